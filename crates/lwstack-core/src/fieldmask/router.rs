//! End-device path router.
//!
//! An end device is stored in up to four registries. Every requested path is
//! routed to exactly one of them, or to the residual set when no registry
//! handles it. Merging reassembles the partial objects the registries return.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use tracing::{debug, warn};

use super::{is_prefix, top_level, value};
use crate::config::ServiceRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Where a single path goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Server(ServiceRole),
    /// Identifiers, timestamps and pending sessions are never routed.
    Skip,
    /// Readable, but no registry accepts writes to it.
    ReadOnly,
    Unknown,
}

const IS_FIELDS: &[&str] = &[
    "activated_at",
    "application_server_address",
    "attributes",
    "claim_authentication_code",
    "description",
    "join_server_address",
    "last_seen_at",
    "locations",
    "lora_alliance_profile_ids",
    "name",
    "network_server_address",
    "picture",
    "serial_number",
    "service_profile_id",
    "version_ids",
];

const NS_FIELDS: &[&str] = &[
    "battery_percentage",
    "downlink_margin",
    "frequency_plan_id",
    "last_dev_status_received_at",
    "lorawan_phy_version",
    "lorawan_version",
    "mac_settings",
    "mac_state",
    "max_frequency",
    "min_frequency",
    "multicast",
    "pending_mac_state",
    "power_state",
    "supports_class_b",
    "supports_class_c",
    "supports_join",
];

const AS_FIELDS: &[&str] = &[
    "formatters",
    "skip_payload_crypto",
    "skip_payload_crypto_override",
];

const JS_FIELDS: &[&str] = &[
    "application_server_id",
    "application_server_kek_label",
    "last_dev_nonce",
    "last_join_nonce",
    "last_rj_count_0",
    "last_rj_count_1",
    "net_id",
    "network_server_kek_label",
    "provisioner_id",
    "provisioning_data",
    "resets_join_nonces",
    "root_keys",
    "used_dev_nonces",
];

/// Fields servers maintain themselves.
const READ_ONLY_FIELDS: &[&str] = &[
    "activated_at",
    "battery_percentage",
    "downlink_margin",
    "last_dev_status_received_at",
    "last_seen_at",
    "power_state",
];

const SKIPPED_FIELDS: &[&str] = &["created_at", "ids", "pending_session", "updated_at"];

const AS_SESSION_PATHS: &[&str] = &["session.keys.app_s_key", "session.last_a_f_cnt_down"];

const SKIPPED_SESSION_PATHS: &[&str] = &["session.keys.session_key_id"];

/// Whether `path` equals `root` or lies beneath it.
fn within(root: &str, path: &str) -> bool {
    path == root || is_prefix(root, path)
}

/// Route a single end-device path.
pub fn classify(path: &str, access: Access) -> Route {
    let top = top_level(path);

    if SKIPPED_FIELDS.contains(&top) {
        return Route::Skip;
    }
    if access == Access::Write && READ_ONLY_FIELDS.contains(&top) {
        return Route::ReadOnly;
    }
    if top == "session" {
        if SKIPPED_SESSION_PATHS.iter().any(|p| within(p, path)) {
            return Route::Skip;
        }
        if AS_SESSION_PATHS.iter().any(|p| within(p, path)) {
            return Route::Server(ServiceRole::Application);
        }
        return Route::Server(ServiceRole::Network);
    }

    let tables = [
        (IS_FIELDS, ServiceRole::Identity),
        (NS_FIELDS, ServiceRole::Network),
        (AS_FIELDS, ServiceRole::Application),
        (JS_FIELDS, ServiceRole::Join),
    ];
    tables
        .iter()
        .find(|(fields, _)| fields.contains(&top))
        .map(|(_, role)| Route::Server(*role))
        .unwrap_or(Route::Unknown)
}

/// Whether a path is expected to end up in the residual set.
pub fn is_known_ignorable(path: &str, access: Access) -> bool {
    matches!(classify(path, access), Route::Skip | Route::ReadOnly)
}

/// Requested paths split per registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPartition {
    pub is_paths: Vec<String>,
    pub ns_paths: Vec<String>,
    pub as_paths: Vec<String>,
    pub js_paths: Vec<String>,
    pub unassigned: Vec<String>,
}

impl PathPartition {
    pub fn paths(&self, role: ServiceRole) -> &[String] {
        match role {
            ServiceRole::Identity => &self.is_paths,
            ServiceRole::Network => &self.ns_paths,
            ServiceRole::Application => &self.as_paths,
            ServiceRole::Join => &self.js_paths,
            _ => &[],
        }
    }

    pub fn paths_mut(&mut self, role: ServiceRole) -> Option<&mut Vec<String>> {
        match role {
            ServiceRole::Identity => Some(&mut self.is_paths),
            ServiceRole::Network => Some(&mut self.ns_paths),
            ServiceRole::Application => Some(&mut self.as_paths),
            ServiceRole::Join => Some(&mut self.js_paths),
            _ => None,
        }
    }

    /// Add a path to a registry unless it is already covered.
    pub fn add(&mut self, role: ServiceRole, path: &str) {
        if let Some(paths) = self.paths_mut(role) {
            if !paths.iter().any(|p| within(p, path)) {
                paths.push(path.to_string());
            }
        }
    }

    /// Remove all Join Server paths, returning what was dropped.
    pub fn drop_join_server_paths(&mut self) -> Vec<String> {
        std::mem::take(&mut self.js_paths)
    }

    pub fn has_server_paths(&self) -> bool {
        !(self.ns_paths.is_empty() && self.as_paths.is_empty() && self.js_paths.is_empty())
    }
}

/// Partition paths across the four end-device registries.
///
/// Every input path lands in exactly one output list. Paths that no registry
/// handles go to `unassigned` and are reported.
pub fn split_end_device_paths<'a, I>(paths: I, access: Access) -> PathPartition
where
    I: IntoIterator<Item = &'a str>,
{
    let mut partition = PathPartition::default();
    for path in paths {
        match classify(path, access) {
            Route::Server(ServiceRole::Identity) => partition.is_paths.push(path.to_string()),
            Route::Server(ServiceRole::Network) => partition.ns_paths.push(path.to_string()),
            Route::Server(ServiceRole::Application) => partition.as_paths.push(path.to_string()),
            Route::Server(ServiceRole::Join) => partition.js_paths.push(path.to_string()),
            Route::Server(_) | Route::Skip => {
                debug!(path, "skipping end device path");
                partition.unassigned.push(path.to_string());
            }
            Route::ReadOnly => {
                warn!(path, "ignoring read-only end device path");
                partition.unassigned.push(path.to_string());
            }
            Route::Unknown => {
                warn!(path, "no registry handles end device path");
                partition.unassigned.push(path.to_string());
            }
        }
    }
    partition
}

fn parse_timestamp(v: &Value) -> Option<DateTime<FixedOffset>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

/// Merge a registry's partial end device into the accumulator.
///
/// Only `paths` are copied. `ids.dev_addr` always comes from the Network
/// Server when present; `created_at` keeps the earliest value seen and
/// `updated_at` the latest.
pub fn merge_partial(dst: &mut Value, partial: &Value, paths: &[String], from: ServiceRole) {
    value::copy_paths(dst, partial, paths.iter().map(String::as_str));

    if from == ServiceRole::Network {
        if let Some(dev_addr) = value::get(partial, "ids.dev_addr").filter(|v| !v.is_null()) {
            value::set(dst, "ids.dev_addr", dev_addr.clone());
        }
    }

    merge_timestamp(dst, partial, "created_at", |new, old| new < old);
    merge_timestamp(dst, partial, "updated_at", |new, old| new > old);
}

fn merge_timestamp<F>(dst: &mut Value, partial: &Value, field: &str, replace: F)
where
    F: Fn(&DateTime<FixedOffset>, &DateTime<FixedOffset>) -> bool,
{
    let Some(new_raw) = partial.get(field).filter(|v| !v.is_null()) else {
        return;
    };
    let Some(new) = parse_timestamp(new_raw) else {
        return;
    };
    let keep_old = dst
        .get(field)
        .and_then(parse_timestamp)
        .is_some_and(|old| !replace(&new, &old));
    if !keep_old {
        value::set(dst, field, new_raw.clone());
    }
}
