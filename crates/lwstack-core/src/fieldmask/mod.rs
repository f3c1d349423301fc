//! Field masks.
//!
//! A field mask is the explicit, ordered set of dotted paths a write applies
//! or a read returns. Paths are never inferred from which fields happen to be
//! non-zero.

pub mod router;
pub mod value;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;

/// Ordered set of dotted field paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMask {
    paths: BTreeSet<String>,
}

impl FieldMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.paths.remove(path)
    }

    pub fn extend<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Whether the mask contains `path`, one of its parents or one of its
    /// children.
    pub fn covers(&self, path: &str) -> bool {
        self.paths
            .iter()
            .any(|p| p == path || is_prefix(p, path) || is_prefix(path, p))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }

    /// Keep only paths the RPC accepts: a path is kept when it, or one of its
    /// parents, is in `allowed`. A path that is a parent of allowed paths is
    /// replaced by them. Dropped paths are logged at debug level.
    pub fn retain_allowed(&mut self, rpc: &str, allowed: &[&str]) {
        let mut kept = BTreeSet::new();
        for path in &self.paths {
            if allowed
                .iter()
                .any(|a| *a == path.as_str() || is_prefix(a, path))
            {
                kept.insert(path.clone());
                continue;
            }
            let children: Vec<&str> = allowed
                .iter()
                .copied()
                .filter(|a| is_prefix(path, a))
                .collect();
            if children.is_empty() {
                debug!(rpc, path = path.as_str(), "dropping path not allowed by RPC");
            }
            kept.extend(children.into_iter().map(str::to_string));
        }
        self.paths = kept;
    }

    /// Fail with `conflicting_paths` when a path is in both masks, or a path
    /// of one mask is a parent of a path of the other.
    pub fn check_conflicts(&self, unset: &FieldMask) -> Result<(), ApiError> {
        let conflicts: Vec<&str> = self
            .paths
            .iter()
            .filter(|p| unset.covers(p))
            .map(String::as_str)
            .collect();
        if conflicts.is_empty() {
            return Ok(());
        }
        Err(ApiError::invalid_argument(
            "cli",
            "conflicting_paths",
            format!("paths `{}` are both set and unset", conflicts.join(", ")),
        )
        .with_attribute("paths", conflicts.join(",")))
    }

    /// JSON representation used in request bodies.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "paths": self.to_vec() })
    }
}

impl<S: Into<String>> FromIterator<S> for FieldMask {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FieldMask {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Whether `prefix` is a strict dotted-path parent of `path`.
pub fn is_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'.'
}

/// Top-level field name of a dotted path.
pub fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}
