//! YAML-formatted output for CLI.

use serde_json::Value;

use super::OutputFormatter;

pub struct YamlOutput;

impl YamlOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for YamlOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn to_yaml<T: serde::Serialize>(value: &T) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| "{}".to_string())
}

impl OutputFormatter for YamlOutput {
    fn format_value(&self, value: &Value) -> String {
        to_yaml(value)
    }

    fn format_list(&self, values: &[Value]) -> String {
        to_yaml(&values)
    }

    /// Stream items are separate YAML documents.
    fn format_stream_item(&self, value: &Value) -> String {
        format!("---\n{}", to_yaml(value))
    }
}
