//! Output formatting for CLI results.
//!
//! Results go to stdout so they can be piped into other tools; logs and
//! errors go to stderr.

pub mod json;
pub mod yaml;

use std::io::Write;

use serde::Serialize;
use serde_json::Value;

pub use json::JsonOutput;
pub use yaml::YamlOutput;

use crate::error::CliError;

/// Output formatter trait
pub trait OutputFormatter: Send + Sync {
    /// Format a single result
    fn format_value(&self, value: &Value) -> String;

    /// Format a list of results as one document
    fn format_list(&self, values: &[Value]) -> String;

    /// Format one document of a stream
    fn format_stream_item(&self, value: &Value) -> String;
}

/// Get the formatter for an `--output-format` value
pub fn get_formatter(format: &str) -> Result<Box<dyn OutputFormatter>, CliError> {
    match format.to_ascii_lowercase().as_str() {
        "json" => Ok(Box::new(JsonOutput::new())),
        "yaml" | "yml" => Ok(Box::new(YamlOutput::new())),
        other => Err(CliError::InvalidArgument(format!(
            "unknown output format `{}`, use json or yaml",
            other
        ))),
    }
}

/// Formatted writer to stdout.
pub struct Output {
    formatter: Box<dyn OutputFormatter>,
    stream: bool,
}

impl Output {
    pub fn new(formatter: Box<dyn OutputFormatter>, stream: bool) -> Self {
        Self { formatter, stream }
    }

    fn write(&self, text: &str) -> Result<(), CliError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", text)?;
        stdout.flush()?;
        Ok(())
    }

    /// Print one result.
    pub fn print<T: Serialize>(&self, value: &T) -> Result<(), CliError> {
        let value = serde_json::to_value(value)?;
        self.write(&self.formatter.format_value(&value))
    }

    /// Print a list: one document with `--stream-output`, else a single
    /// array.
    pub fn print_list(&self, values: &[Value]) -> Result<(), CliError> {
        if self.stream {
            for value in values {
                self.print_item(value)?;
            }
            return Ok(());
        }
        self.write(&self.formatter.format_list(values))
    }

    /// Print one element of an open-ended stream as soon as it arrives.
    pub fn print_item(&self, value: &Value) -> Result<(), CliError> {
        self.write(&self.formatter.format_stream_item(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_formatter() {
        assert!(get_formatter("json").is_ok());
        assert!(get_formatter("YAML").is_ok());
        assert!(matches!(get_formatter("table"), Err(CliError::InvalidArgument(_))));
    }
}
