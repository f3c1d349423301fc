//! JSON-formatted output for CLI.

use serde::Serialize;
use serde_json::Value;

use super::OutputFormatter;

pub struct JsonOutput;

impl JsonOutput {
    pub fn new() -> Self {
        Self
    }

    fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for JsonOutput {
    fn format_value(&self, value: &Value) -> String {
        Self::to_json(value)
    }

    fn format_list(&self, values: &[Value]) -> String {
        Self::to_json(&values)
    }

    fn format_stream_item(&self, value: &Value) -> String {
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_items_are_single_line() {
        let out = JsonOutput::new();
        let item = out.format_stream_item(&json!({"name": "a", "nested": {"b": [1, 2]}}));
        assert!(!item.contains('\n'));
        assert_eq!(serde_json::from_str::<Value>(&item).unwrap()["nested"]["b"][1], 2);
    }

    #[test]
    fn test_list_is_an_array() {
        let out = JsonOutput::new();
        let list = out.format_list(&[json!({"a": 1}), json!({"a": 2})]);
        let parsed: Value = serde_json::from_str(&list).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));
        assert_eq!(out.format_list(&[]), "[]");
    }
}
