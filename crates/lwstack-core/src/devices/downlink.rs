//! Application Server downlink queue.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::ids::EndDeviceIds;
use crate::registry::take_list;
use crate::schema::rpcs;

/// An application downlink as queued on the Application Server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downlink {
    #[serde(default)]
    pub f_port: u32,
    /// Base64 payload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub frm_payload: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_payload: Option<Value>,
}

impl Downlink {
    pub fn new(f_port: u32, payload: &[u8]) -> Self {
        Self {
            f_port,
            frm_payload: base64::engine::general_purpose::STANDARD.encode(payload),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.f_port == 0 {
            return Err(ApiError::invalid_argument(
                "cli",
                "no_f_port",
                "no FPort set, use an FPort from 1 to 223",
            ));
        }
        Ok(())
    }
}

async fn queue(
    client: &ApiClient,
    rpc: &str,
    ids: &EndDeviceIds,
    downlinks: &[Downlink],
) -> Result<(), CoreError> {
    for downlink in downlinks {
        downlink.validate()?;
    }
    client
        .call(
            ServiceRole::Application,
            rpc,
            json!({ "end_device_ids": ids.to_json(), "downlinks": downlinks }),
        )
        .await?;
    Ok(())
}

/// Append downlinks to the queue.
pub async fn push(client: &ApiClient, ids: &EndDeviceIds, downlinks: &[Downlink]) -> Result<(), CoreError> {
    queue(client, rpcs::DOWNLINK_QUEUE_PUSH, ids, downlinks).await
}

/// Replace the queue with `downlinks`.
pub async fn replace(client: &ApiClient, ids: &EndDeviceIds, downlinks: &[Downlink]) -> Result<(), CoreError> {
    queue(client, rpcs::DOWNLINK_QUEUE_REPLACE, ids, downlinks).await
}

pub async fn clear(client: &ApiClient, ids: &EndDeviceIds) -> Result<(), CoreError> {
    queue(client, rpcs::DOWNLINK_QUEUE_REPLACE, ids, &[]).await
}

pub async fn list(client: &ApiClient, ids: &EndDeviceIds) -> Result<Vec<Value>, CoreError> {
    let response = client
        .call(ServiceRole::Application, rpcs::DOWNLINK_QUEUE_LIST, ids.to_json())
        .await?;
    Ok(take_list(response, "downlinks"))
}
