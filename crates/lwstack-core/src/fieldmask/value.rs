//! Dotted-path access on JSON message values.

use serde_json::{Map, Value};

/// Get the value at a dotted path.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |v, key| v.get(key))
}

/// Whether a non-null value exists at `path`.
pub fn has(root: &Value, path: &str) -> bool {
    get(root, path).is_some_and(|v| !v.is_null())
}

/// Set the value at a dotted path, creating intermediate objects.
pub fn set(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(key) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(key.to_string(), value);
            return;
        }
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Remove the value at a dotted path. Empty parent objects are left behind.
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, last)) => get_mut(root, parent)?.as_object_mut()?.remove(last),
        None => root.as_object_mut()?.remove(path),
    }
}

pub fn get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(root, |v, key| v.get_mut(key))
}

/// Copy `paths` from `src` into `dst`. Paths absent in `src` are left
/// untouched in `dst`.
pub fn copy_paths<'a, I>(dst: &mut Value, src: &Value, paths: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for path in paths {
        if let Some(v) = get(src, path) {
            set(dst, path, v.clone());
        }
    }
}

/// Build a new value holding only `paths` of `src`.
pub fn project<'a, I>(src: &Value, paths: I) -> Value
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Value::Object(Map::new());
    copy_paths(&mut out, src, paths);
    out
}

/// Leaf paths present in a value. Objects recurse; arrays, scalars and empty
/// objects are leaves.
pub fn leaf_paths(root: &Value) -> Vec<String> {
    fn walk(v: &Value, prefix: &str, out: &mut Vec<String>) {
        match v {
            Value::Object(map) if !map.is_empty() => {
                for (k, child) in map {
                    let path = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{}.{}", prefix, k)
                    };
                    walk(child, &path, out);
                }
            }
            _ if !prefix.is_empty() => out.push(prefix.to_string()),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(root, "", &mut out);
    out
}

/// Top-level field names present in a value.
pub fn top_level_paths(root: &Value) -> Vec<String> {
    root.as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}
