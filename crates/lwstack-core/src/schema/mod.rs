//! Message schemas.
//!
//! Each entity is described by an immutable table of field specs keyed by
//! dotted path. The CLI derives its flags from these tables and uses
//! [`FieldSpec::parse`] to turn flag values into JSON message fields.

pub mod entities;
pub mod rpcs;

use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::config::parse_duration;
use crate::error::ApiError;
use crate::lorawan::{AesKey, DevAddr, Eui64, MacVersion};

pub use entities::{EntityDescriptor, EntityRpcs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bool,
    Int,
    Uint,
    Float,
    Eui,
    DevAddr,
    /// AES-128 key as hex.
    Key,
    /// Byte string; accepts base64 or `hex:` prefixed input.
    Bytes,
    Timestamp,
    Duration,
    Enum(&'static [&'static str]),
    /// `key=value` pairs separated by commas.
    StringMap,
    StringList,
    UintList,
    /// Arbitrary JSON.
    Json,
    MacVersion,
}

/// A settable field of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: &'static str,
    pub kind: FieldKind,
    pub help: &'static str,
}

pub const fn field(path: &'static str, kind: FieldKind, help: &'static str) -> FieldSpec {
    FieldSpec { path, kind, help }
}

/// Flag name for a dotted path: dots and underscores become dashes.
pub fn flag_name(path: &str) -> String {
    path.replace(['.', '_'], "-")
}

fn invalid(path: &str, message: impl Into<String>) -> ApiError {
    ApiError::invalid_argument("cli", "invalid_field_value", message)
        .with_attribute("field", path.to_string())
}

impl FieldSpec {
    pub fn flag_name(&self) -> String {
        flag_name(self.path)
    }

    pub fn is_bool(&self) -> bool {
        self.kind == FieldKind::Bool
    }

    /// Parse a raw flag value into the JSON representation of the field.
    pub fn parse(&self, raw: &str) -> Result<Value, ApiError> {
        let path = self.path;
        let raw_trimmed = raw.trim();
        match self.kind {
            FieldKind::String => Ok(Value::String(raw.to_string())),
            FieldKind::Bool => match raw_trimmed {
                "" | "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                other => Err(invalid(path, format!("`{}` is not a boolean", other))),
            },
            FieldKind::Int => raw_trimmed
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| invalid(path, e.to_string())),
            FieldKind::Uint => raw_trimmed
                .parse::<u64>()
                .map(Value::from)
                .map_err(|e| invalid(path, e.to_string())),
            FieldKind::Float => raw_trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(path, format!("`{}` is not a number", raw_trimmed))),
            FieldKind::Eui => raw_trimmed
                .parse::<Eui64>()
                .map(|v| Value::String(v.to_string()))
                .map_err(|e| invalid(path, e.to_string())),
            FieldKind::DevAddr => raw_trimmed
                .parse::<DevAddr>()
                .map(|v| Value::String(v.to_string()))
                .map_err(|e| invalid(path, e.to_string())),
            FieldKind::Key => raw_trimmed
                .parse::<AesKey>()
                .map(|v| Value::String(v.to_string()))
                .map_err(|e| invalid(path, e.to_string())),
            FieldKind::Bytes => parse_bytes(raw_trimmed)
                .map(|b| Value::String(base64::engine::general_purpose::STANDARD.encode(b)))
                .map_err(|e| invalid(path, e)),
            FieldKind::Timestamp => chrono::DateTime::parse_from_rfc3339(raw_trimmed)
                .map(|t| Value::String(t.to_rfc3339()))
                .map_err(|e| invalid(path, e.to_string())),
            FieldKind::Duration => parse_duration(raw_trimmed)
                .map(|d| Value::String(format!("{}s", d.as_secs_f64())))
                .map_err(|e| invalid(path, e)),
            FieldKind::Enum(values) => {
                let upper = raw_trimmed.to_ascii_uppercase();
                values
                    .iter()
                    .find(|v| **v == upper || v.ends_with(&format!("_{}", upper)))
                    .map(|v| Value::String(v.to_string()))
                    .ok_or_else(|| {
                        invalid(
                            path,
                            format!("`{}` is not one of {}", raw_trimmed, values.join(", ")),
                        )
                    })
            }
            FieldKind::StringMap => {
                let mut map = Map::new();
                for pair in raw.split(',').filter(|p| !p.is_empty()) {
                    let (k, v) = pair
                        .split_once('=')
                        .ok_or_else(|| invalid(path, format!("`{}` is not key=value", pair)))?;
                    map.insert(k.trim().to_string(), Value::String(v.to_string()));
                }
                Ok(Value::Object(map))
            }
            FieldKind::StringList => Ok(Value::Array(
                raw.split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.trim().to_string()))
                    .collect(),
            )),
            FieldKind::UintList => raw
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.trim()
                        .parse::<u64>()
                        .map(Value::from)
                        .map_err(|e| invalid(path, e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            FieldKind::Json => {
                serde_json::from_str(raw).map_err(|e| invalid(path, e.to_string()))
            }
            FieldKind::MacVersion => raw_trimmed
                .parse::<MacVersion>()
                .map(|v| Value::String(v.as_str().to_string()))
                .map_err(|e| invalid(path, e.to_string()).with_attribute("name", "mac_version")),
        }
    }
}

/// Parse `hex:` prefixed, `0x` prefixed or base64 input into bytes.
pub fn parse_bytes(raw: &str) -> Result<Vec<u8>, String> {
    if let Some(hex_str) = raw.strip_prefix("hex:").or_else(|| raw.strip_prefix("0x")) {
        return hex::decode(hex_str).map_err(|e| e.to_string());
    }
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flag_names() {
        assert_eq!(flag_name("root_keys.app_key.key"), "root-keys-app-key-key");
        assert_eq!(flag_name("name"), "name");
    }

    #[test]
    fn test_parse_kinds() {
        let eui = field("ids.dev_eui", FieldKind::Eui, "");
        assert_eq!(eui.parse("0004a30b001c0530").unwrap(), json!("0004A30B001C0530"));
        assert!(eui.parse("0004").is_err());

        let attrs = field("attributes", FieldKind::StringMap, "");
        assert_eq!(attrs.parse("a=1,b=x=y").unwrap(), json!({"a": "1", "b": "x=y"}));

        let class = field("lorawan_phy_version", FieldKind::Enum(&["PHY_V1_0_3_REV_A", "PHY_V1_1_REV_B"]), "");
        assert_eq!(class.parse("v1_1_rev_b").unwrap(), json!("PHY_V1_1_REV_B"));

        let bytes = field("payload", FieldKind::Bytes, "");
        assert_eq!(bytes.parse("hex:0102").unwrap(), json!("AQI="));
        assert_eq!(bytes.parse("AQI=").unwrap(), json!("AQI="));

        let version = field("lorawan_version", FieldKind::MacVersion, "");
        assert_eq!(version.parse("1.0.3").unwrap(), json!("MAC_V1_0_3"));

        let duration = field("rx1_delay", FieldKind::Duration, "");
        assert_eq!(duration.parse("1500ms").unwrap(), json!("1.5s"));
    }
}
