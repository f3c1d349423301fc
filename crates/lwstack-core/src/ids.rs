//! Entity identifiers.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::lorawan::{DevAddr, Eui64};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationIds {
    pub application_id: String,
}

impl ApplicationIds {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            application_id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndDeviceIds {
    pub device_id: String,
    pub application_ids: ApplicationIds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<Eui64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_eui: Option<Eui64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_addr: Option<DevAddr>,
}

impl EndDeviceIds {
    pub fn new(application_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            application_ids: ApplicationIds::new(application_id),
            ..Default::default()
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_ids.application_id
    }

    pub fn has_euis(&self) -> bool {
        self.dev_eui.is_some() && self.join_eui.is_some()
    }

    /// Identifiers as they appear in request bodies.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// Read identifiers from a device message.
    pub fn from_device(device: &Value) -> Result<Self, ApiError> {
        let ids = device.get("ids").cloned().unwrap_or(Value::Null);
        serde_json::from_value(ids).map_err(|e| {
            ApiError::invalid_argument("cli", "end_device_ids", e.to_string())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayIds {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eui: Option<Eui64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIds {
    pub client_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIds {
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationIds {
    pub organization_id: String,
}

/// Any entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityIds {
    #[serde(rename = "application_ids")]
    Application(ApplicationIds),
    #[serde(rename = "device_ids")]
    EndDevice(EndDeviceIds),
    #[serde(rename = "gateway_ids")]
    Gateway(GatewayIds),
    #[serde(rename = "client_ids")]
    Client(ClientIds),
    #[serde(rename = "user_ids")]
    User(UserIds),
    #[serde(rename = "organization_ids")]
    Organization(OrganizationIds),
}

impl EntityIds {
    /// Field name of the identifiers in request bodies.
    pub fn field(&self) -> &'static str {
        match self {
            EntityIds::Application(_) => "application_ids",
            EntityIds::EndDevice(_) => "end_device_ids",
            EntityIds::Gateway(_) => "gateway_ids",
            EntityIds::Client(_) => "client_ids",
            EntityIds::User(_) => "user_ids",
            EntityIds::Organization(_) => "organization_ids",
        }
    }

    /// The inner identifiers as JSON.
    pub fn inner_json(&self) -> Value {
        let v = match self {
            EntityIds::Application(ids) => serde_json::to_value(ids),
            EntityIds::EndDevice(ids) => serde_json::to_value(ids),
            EntityIds::Gateway(ids) => serde_json::to_value(ids),
            EntityIds::Client(ids) => serde_json::to_value(ids),
            EntityIds::User(ids) => serde_json::to_value(ids),
            EntityIds::Organization(ids) => serde_json::to_value(ids),
        };
        v.unwrap_or_else(|_| json!({}))
    }

    /// `{"<field>": {...}}`.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(self.field().to_string(), self.inner_json());
        Value::Object(map)
    }

    /// Identifier of an organization or user, as used for collaborators
    /// and ownership.
    pub fn to_account_json(&self) -> Option<Value> {
        match self {
            EntityIds::User(ids) => Some(json!({"user_ids": ids})),
            EntityIds::Organization(ids) => Some(json!({"organization_ids": ids})),
            _ => None,
        }
    }
}

/// Lowercase alphanumerics separated by single dashes.
const ID_PATTERN: &str = "^[a-z0-9](?:-?[a-z0-9])+$";

fn id_regex() -> Option<&'static Regex> {
    static ID_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    ID_REGEX.get_or_init(|| Regex::new(ID_PATTERN).ok()).as_ref()
}

/// Check an identifier against the usual ID rules: 2 to 36 lowercase
/// alphanumerics or dashes, no leading, trailing or double dashes.
pub fn validate_id(field: &str, id: &str) -> Result<(), ApiError> {
    let valid = (2..=36).contains(&id.len()) && id_regex().is_some_and(|re| re.is_match(id));
    if valid {
        Ok(())
    } else {
        Err(ApiError::invalid_argument(
            "cli",
            &format!("invalid_{}", field),
            format!("invalid {} `{}`", field.replace('_', " "), id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_device_ids_json() {
        let mut ids = EndDeviceIds::new("app1", "dev1");
        ids.dev_eui = Some("0004A30B001C0530".parse().unwrap());
        let v = ids.to_json();
        assert_eq!(v["application_ids"]["application_id"], "app1");
        assert_eq!(v["dev_eui"], "0004A30B001C0530");
        assert!(v.get("join_eui").is_none());
        let device = json!({"ids": v});
        assert_eq!(EndDeviceIds::from_device(&device).unwrap(), ids);
    }

    #[test]
    fn test_entity_ids_json() {
        let ids = EntityIds::Application(ApplicationIds::new("app1"));
        assert_eq!(ids.to_json(), json!({"application_ids": {"application_id": "app1"}}));
        let user = EntityIds::User(UserIds {
            user_id: "admin".to_string(),
        });
        assert_eq!(
            user.to_account_json().unwrap(),
            json!({"user_ids": {"user_id": "admin"}})
        );
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("application_id", "app-1").is_ok());
        assert!(validate_id("application_id", "App").is_err());
        assert!(validate_id("application_id", "a").is_err());
        assert!(validate_id("device_id", "a--b").is_err());
    }
}
