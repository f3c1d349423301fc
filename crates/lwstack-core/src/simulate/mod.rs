//! Gateway simulation.
//!
//! Plays the role of a gateway on the Gateway Server's link stream: an
//! encoded uplink goes up, and downlinks scheduled for it are decoded as
//! they come back.

pub mod radio;

use std::time::Duration;

use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::stream::StreamReceiver;
use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::CoreError;
use crate::ids::GatewayIds;
use crate::lorawan::{self, CodecOptions, DecodedFrame, Frame};
use crate::schema::rpcs;

pub use radio::{RadioMetadata, RadioSettings};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_DOWNLINKS: usize = 1;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub gateway: GatewayIds,
    pub radio: RadioSettings,
    /// How long to wait for downlinks.
    pub timeout: Duration,
    /// Number of downlinks to wait for.
    pub downlinks: usize,
    /// Print the uplink instead of sending it.
    pub dry_run: bool,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            gateway: GatewayIds::default(),
            radio: RadioSettings::default(),
            timeout: DEFAULT_TIMEOUT,
            downlinks: DEFAULT_DOWNLINKS,
            dry_run: false,
        }
    }
}

/// A downlink received on the link, with its decoded frame.
#[derive(Debug, Clone, Serialize)]
pub struct Downlink {
    pub message: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded: Option<DecodedFrame>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub uplink: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub downlinks: Vec<Downlink>,
}

fn decode_downlink(message: Value, codec: &CodecOptions) -> Downlink {
    let raw = message
        .get("downlink_message")
        .and_then(|d| d.get("raw_payload"))
        .and_then(Value::as_str)
        .and_then(|p| base64::engine::general_purpose::STANDARD.decode(p).ok());
    let Some(raw) = raw else {
        return Downlink {
            message,
            decoded: None,
            warnings: vec!["downlink carries no raw payload".to_string()],
        };
    };
    match lorawan::decode(&raw, codec) {
        Ok(decoded) => {
            for warning in &decoded.warnings {
                warn!(warning = warning.as_str(), "downlink decoded with warnings");
            }
            let warnings = decoded.warnings.clone();
            Downlink {
                message,
                decoded: Some(decoded),
                warnings,
            }
        }
        Err(err) => {
            warn!(error = %err, "could not decode downlink");
            Downlink {
                message,
                decoded: None,
                warnings: vec![err.to_string()],
            }
        }
    }
}

/// Receive downlinks until `expected` arrived, the stream ends or `timeout`
/// passes. Downlinks received before the timeout are kept.
fn spawn_receiver(
    mut receiver: StreamReceiver,
    expected: usize,
    timeout: Duration,
    codec: CodecOptions,
    cancel: tokio_util::sync::CancellationToken,
) -> JoinHandle<Result<Vec<Downlink>, CoreError>> {
    tokio::spawn(async move {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut downlinks = Vec::new();
        while downlinks.len() < expected {
            let received = tokio::select! {
                received = receiver.recv_until(&cancel) => received,
                _ = &mut deadline => {
                    warn!(?timeout, received = downlinks.len(), expected, "timed out waiting for downlinks");
                    break;
                }
            };
            let Some(message) = received else {
                break;
            };
            let message = message?;
            if message.get("downlink_message").is_none() {
                debug!("ignoring link message without downlink");
                continue;
            }
            info!(count = downlinks.len() + 1, "received downlink");
            downlinks.push(decode_downlink(message, &codec));
        }
        Ok(downlinks)
    })
}

/// Encode `frame` and send it as an uplink through a simulated gateway.
///
/// The link is primed with an empty gateway message before the uplink is
/// sent. Downlinks are awaited for at most `opts.timeout`; fewer than
/// expected is not an error.
pub async fn run(
    client: &ApiClient,
    frame: &Frame,
    codec: &CodecOptions,
    opts: &SimulateOptions,
) -> Result<SimulationResult, CoreError> {
    let radio = opts.radio.resolve(codec.band)?;
    let mut codec = codec.clone();
    codec.tx_dr = radio.data_rate_index;
    codec.tx_ch = u8::try_from(radio.channel_index).unwrap_or(u8::MAX);
    let payload = lorawan::encode(frame, &codec)?;
    let uplink = radio.uplink_message(&payload, &opts.gateway);

    if opts.dry_run {
        return Ok(SimulationResult {
            uplink,
            downlinks: Vec::new(),
        });
    }

    let stream = client
        .open_stream(ServiceRole::Gateway, rpcs::GATEWAY_LINK, json!({}))
        .await?;
    let (sender, receiver) = stream.split();
    let cancel = client.cancel_token().child_token();
    let receiving = spawn_receiver(receiver, opts.downlinks, opts.timeout, codec, cancel.clone());

    sender
        .send(json!({ "uplink_messages": [uplink.clone()] }))
        .await?;
    debug!(frequency = radio.frequency, "sent uplink");

    if opts.downlinks == 0 {
        cancel.cancel();
        return Ok(SimulationResult {
            uplink,
            downlinks: Vec::new(),
        });
    }

    let downlinks = receiving
        .await
        .map_err(|e| CoreError::Other(e.to_string()))??;
    cancel.cancel();
    Ok(SimulationResult { uplink, downlinks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use crate::lorawan::{AesKey, DataFrame, DevAddr, JoinRequestFrame, SessionKeys};
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

    fn join_request() -> (Frame, CodecOptions) {
        let frame = Frame::JoinRequest(JoinRequestFrame {
            join_eui: "70B3D57ED0000000".parse().unwrap(),
            dev_eui: "0004A30B001C0530".parse().unwrap(),
            dev_nonce: 1,
        });
        let codec = CodecOptions {
            app_key: Some(AesKey([0x2B; 16])),
            ..Default::default()
        };
        (frame, codec)
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let mock = Arc::new(MockTransport::new());
        let (frame, codec) = join_request();
        let opts = SimulateOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = run(&client(&mock), &frame, &codec, &opts).await.unwrap();
        let raw = result.uplink["raw_payload"].as_str().unwrap();
        assert_eq!(base64::engine::general_purpose::STANDARD.decode(raw).unwrap().len(), 23);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_uplink_then_downlink() {
        let keys = SessionKeys::legacy(AesKey([1; 16]), AesKey([2; 16]));
        let codec = CodecOptions {
            session: keys,
            ..Default::default()
        };
        let down = Frame::UnconfirmedDown(DataFrame {
            dev_addr: DevAddr([0x26, 0x01, 0x12, 0x34]),
            f_port: Some(1),
            frm_payload: vec![0xAB].into(),
            ..Default::default()
        });
        let down_bytes = lorawan::encode(&down, &codec).unwrap();

        let mock = Arc::new(MockTransport::new());
        let sent = mock.on_stream(
            rpcs::GATEWAY_LINK,
            vec![Ok(json!({"downlink_message": {
                "raw_payload": base64::engine::general_purpose::STANDARD.encode(&down_bytes)
            }}))],
        );
        let up = Frame::UnconfirmedUp(DataFrame {
            dev_addr: DevAddr([0x26, 0x01, 0x12, 0x34]),
            f_port: Some(1),
            frm_payload: vec![0x01].into(),
            ..Default::default()
        });
        let result = run(&client(&mock), &up, &codec, &SimulateOptions::default())
            .await
            .unwrap();

        assert_eq!(result.downlinks.len(), 1);
        let decoded = result.downlinks[0].decoded.as_ref().unwrap();
        assert_eq!(decoded.frame, down);
        let sent = sent.lock().unwrap().clone();
        assert_eq!(sent[0], json!({}));
        assert!(sent[1]["uplink_messages"][0]["raw_payload"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_downlinks() {
        let mock = Arc::new(MockTransport::new());
        mock.on_stream(rpcs::GATEWAY_LINK, vec![]);
        let (frame, codec) = join_request();
        let opts = SimulateOptions {
            timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let result = run(&client(&mock), &frame, &codec, &opts).await.unwrap();
        assert!(result.downlinks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_received_downlinks() {
        let mock = Arc::new(MockTransport::new());
        mock.on_open_stream(
            rpcs::GATEWAY_LINK,
            vec![
                Ok(json!({"gateway_down": {}})),
                Ok(json!({"downlink_message": {"raw_payload": "IAE="}})),
            ],
        );
        let (frame, codec) = join_request();
        let opts = SimulateOptions {
            timeout: Duration::from_secs(1),
            downlinks: 2,
            ..Default::default()
        };
        let result = run(&client(&mock), &frame, &codec, &opts).await.unwrap();
        assert_eq!(result.downlinks.len(), 1);
        assert_eq!(result.downlinks[0].message["downlink_message"]["raw_payload"], "IAE=");
    }
}
