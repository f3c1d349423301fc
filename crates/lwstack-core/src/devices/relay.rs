//! Relay configuration on the Network Server.

use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::fieldmask::FieldMask;
use crate::ids::EndDeviceIds;
use crate::schema::rpcs;

/// Relays forward at most this many uplink forwarding rules.
pub const MAX_FORWARDING_RULES: u32 = 16;

async fn call(client: &ApiClient, rpc: &str, body: Value) -> Result<Value, CoreError> {
    client.call(ServiceRole::Network, rpc, body).await
}

fn check_settings(settings: &Value) -> Result<(), ApiError> {
    let serving = settings.get("serving").is_some_and(|v| !v.is_null());
    let served = settings.get("served").is_some_and(|v| !v.is_null());
    if serving == served {
        return Err(ApiError::invalid_argument(
            "cli",
            "relay_mode",
            "a relay is either serving or served",
        ));
    }
    Ok(())
}

/// Configure an end device as a serving relay or as a device served by one.
pub async fn create(client: &ApiClient, ids: &EndDeviceIds, settings: Value) -> Result<Value, CoreError> {
    check_settings(&settings)?;
    let body = json!({ "end_device_ids": ids.to_json(), "settings": settings });
    call(client, rpcs::RELAY_CREATE, body).await
}

pub async fn get(client: &ApiClient, ids: &EndDeviceIds, mask: &FieldMask) -> Result<Value, CoreError> {
    let mut mask = mask.clone();
    if let Some(allowed) = rpcs::allowed_paths(rpcs::RELAY_GET) {
        mask.retain_allowed(rpcs::RELAY_GET, allowed);
    }
    let body = json!({ "end_device_ids": ids.to_json(), "field_mask": mask.to_json() });
    call(client, rpcs::RELAY_GET, body).await
}

pub async fn update(
    client: &ApiClient,
    ids: &EndDeviceIds,
    settings: Value,
    mask: &FieldMask,
) -> Result<Value, CoreError> {
    let body = json!({
        "end_device_ids": ids.to_json(),
        "settings": settings,
        "field_mask": mask.to_json(),
    });
    call(client, rpcs::RELAY_UPDATE, body).await
}

pub async fn delete(client: &ApiClient, ids: &EndDeviceIds) -> Result<(), CoreError> {
    call(client, rpcs::RELAY_DELETE, json!({ "end_device_ids": ids.to_json() })).await?;
    Ok(())
}

fn check_index(index: u32) -> Result<(), ApiError> {
    if index >= MAX_FORWARDING_RULES {
        return Err(ApiError::invalid_argument(
            "cli",
            "forwarding_rule_index",
            format!("forwarding rule index must be below {}", MAX_FORWARDING_RULES),
        )
        .with_attribute("index", index));
    }
    Ok(())
}

/// Add an uplink forwarding rule at `index` of a serving relay.
pub async fn add_forwarding_rule(
    client: &ApiClient,
    ids: &EndDeviceIds,
    index: u32,
    rule: Value,
) -> Result<Value, CoreError> {
    check_index(index)?;
    let body = json!({ "end_device_ids": ids.to_json(), "index": index, "rule": rule });
    call(client, rpcs::RELAY_CREATE_FORWARDING_RULE, body).await
}

pub async fn delete_forwarding_rule(client: &ApiClient, ids: &EndDeviceIds, index: u32) -> Result<(), CoreError> {
    check_index(index)?;
    let body = json!({ "end_device_ids": ids.to_json(), "index": index });
    call(client, rpcs::RELAY_DELETE_FORWARDING_RULE, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::new(
            mock.clone(),
            ServiceAddresses::for_host("eu1.example.com", false),
            None,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_relay_mode_is_exclusive() {
        let mock = Arc::new(MockTransport::new());
        let ids = EndDeviceIds::new("app1", "relay1");
        let err = create(&client(&mock), &ids, json!({"serving": {}, "served": {}}))
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "relay_mode");

        mock.on(rpcs::RELAY_CREATE, |body| Ok(json!({"settings": body["settings"].clone()})));
        let created = create(&client(&mock), &ids, json!({"serving": {"second_channel": null}}))
            .await
            .unwrap();
        assert!(created["settings"]["serving"].is_object());
        assert_eq!(mock.calls()[0].role, ServiceRole::Network);
    }

    #[tokio::test]
    async fn test_forwarding_rule_index_bounds() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::RELAY_DELETE_FORWARDING_RULE, |_| Ok(json!({})));
        let ids = EndDeviceIds::new("app1", "relay1");
        delete_forwarding_rule(&client(&mock), &ids, 3).await.unwrap();
        assert_eq!(mock.calls()[0].body["index"], 3);
        let err = delete_forwarding_rule(&client(&mock), &ids, 16)
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "forwarding_rule_index");
    }
}
