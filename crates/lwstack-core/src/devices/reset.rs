//! Factory reset of an end device.

use serde_json::{json, Value};
use tracing::debug;

use super::{get_from, set_on, uses_external_join_server, IS_ADDRESS_PATHS};
use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::CoreError;
use crate::fieldmask::FieldMask;
use crate::ids::EndDeviceIds;
use crate::schema::rpcs;

const AS_OTAA_RESET_PATHS: [&str; 2] = ["pending_session", "session"];
const AS_ABP_RESET_PATHS: [&str; 1] = ["session.last_a_f_cnt_down"];
const JS_RESET_PATHS: [&str; 5] = [
    "last_dev_nonce",
    "last_join_nonce",
    "last_rj_count_0",
    "last_rj_count_1",
    "used_dev_nonces",
];

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

/// Reset an end device to factory defaults.
///
/// The Network Server resets its MAC state. The Application Server drops its
/// session (OTAA) or downlink counter (ABP), and the cluster Join Server
/// forgets the join nonces of OTAA devices.
pub async fn reset(client: &ApiClient, ids: &EndDeviceIds) -> Result<Value, CoreError> {
    let stored = get_from(client, ServiceRole::Identity, ids, &owned(&IS_ADDRESS_PATHS)).await?;
    let ids = EndDeviceIds::from_device(&stored).unwrap_or_else(|_| ids.clone());
    let otaa = ids.has_euis();

    let mask: FieldMask = ["supports_join", "session", "mac_state", "lorawan_version"]
        .into_iter()
        .collect();
    let reset = client
        .call(
            ServiceRole::Network,
            rpcs::END_DEVICE_NS_RESET,
            json!({ "end_device_ids": ids.to_json(), "field_mask": mask.to_json() }),
        )
        .await?;
    let supports_join = reset
        .get("supports_join")
        .and_then(Value::as_bool)
        .unwrap_or(otaa);

    let as_paths = if supports_join {
        owned(&AS_OTAA_RESET_PATHS)
    } else {
        owned(&AS_ABP_RESET_PATHS)
    };
    // Absent values clear the paths.
    let cleared = json!({});
    set_on(client, ServiceRole::Application, &ids, &cleared, &as_paths).await?;

    if supports_join && ids.has_euis() && !uses_external_join_server(client, &ids, &stored) {
        set_on(client, ServiceRole::Join, &ids, &cleared, &owned(&JS_RESET_PATHS)).await?;
    } else {
        debug!("not resetting join nonces");
    }
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use crate::error::ApiError;
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

    fn ok(_: &Value) -> Result<Value, ApiError> {
        Ok(json!({}))
    }

    #[tokio::test]
    async fn test_reset_otaa_clears_sessions_and_nonces() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_GET, |_| {
            Ok(json!({
                "ids": {
                    "device_id": "dev1",
                    "application_ids": {"application_id": "app1"},
                    "dev_eui": "0004A30B001C0530",
                    "join_eui": "70B3D57ED0000000"
                },
                "join_server_address": "eu1.example.com"
            }))
        });
        mock.on(rpcs::END_DEVICE_NS_RESET, |_| Ok(json!({"supports_join": true})));
        mock.on(rpcs::END_DEVICE_AS_SET, ok);
        mock.on(rpcs::END_DEVICE_JS_SET, ok);
        reset(&client(&mock), &EndDeviceIds::new("app1", "dev1")).await.unwrap();

        let as_body = &mock.calls_to(rpcs::END_DEVICE_AS_SET)[0].body;
        assert_eq!(as_body["field_mask"]["paths"], json!(["pending_session", "session.dev_addr", "session.keys.app_s_key", "session.last_a_f_cnt_down", "session.started_at"]));
        assert!(as_body["end_device"].get("session").is_none());
        let js_body = &mock.calls_to(rpcs::END_DEVICE_JS_SET)[0].body;
        assert_eq!(js_body["field_mask"]["paths"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_reset_abp_keeps_join_server() {
        let mock = Arc::new(MockTransport::new());
        mock.on(rpcs::END_DEVICE_IS_GET, |_| {
            Ok(json!({"ids": {"device_id": "dev1", "application_ids": {"application_id": "app1"}}}))
        });
        mock.on(rpcs::END_DEVICE_NS_RESET, |_| Ok(json!({"supports_join": false})));
        mock.on(rpcs::END_DEVICE_AS_SET, ok);
        reset(&client(&mock), &EndDeviceIds::new("app1", "dev1")).await.unwrap();

        let as_body = &mock.calls_to(rpcs::END_DEVICE_AS_SET)[0].body;
        assert_eq!(as_body["field_mask"]["paths"], json!(["session.last_a_f_cnt_down"]));
        assert!(mock.calls_to(rpcs::END_DEVICE_JS_SET).is_empty());
    }
}
