//! HTTP and WebSocket transport.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::ClientConfig;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, warn};

use super::stream::RpcStream;
use super::tls;
use super::{RpcRequest, Transport};
use crate::error::{ApiError, ErrorKind, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub insecure: bool,
    pub ca: Option<PathBuf>,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            insecure: false,
            ca: None,
            request_timeout: Duration::from_secs(30),
            user_agent: format!("lwstack/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Transport over the HTTP/JSON binding. Channels are dialed lazily, one
/// pooled client per backend address.
pub struct HttpTransport {
    settings: HttpSettings,
    tls: Option<Arc<ClientConfig>>,
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(settings: HttpSettings) -> Result<Self, TransportError> {
        let tls = if settings.insecure {
            warn!("using insecure connections");
            None
        } else {
            Some(Arc::new(tls::client_config(settings.ca.as_deref())?))
        };
        Ok(Self {
            settings,
            tls,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// A plain HTTP client with the same TLS settings, for non-RPC endpoints.
    pub fn http_client(&self) -> Result<reqwest::Client, TransportError> {
        self.build_client()
    }

    fn build_client(&self) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.settings.user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.settings.request_timeout);
        if let Some(config) = &self.tls {
            builder = builder.use_preconfigured_tls((**config).clone());
        }
        Ok(builder.build()?)
    }

    async fn client_for(&self, address: &str) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(address) {
            return Ok(client.clone());
        }
        debug!(address, "dialing");
        let client = self.build_client()?;
        clients.insert(address.to_string(), client.clone());
        Ok(client)
    }

    fn rpc_url(&self, address: &str, method: &str) -> String {
        let scheme = if self.settings.insecure { "http" } else { "https" };
        format!("{}://{}/api/v3/rpc/{}", scheme, address, method)
    }

    fn stream_url(&self, address: &str, method: &str) -> String {
        let scheme = if self.settings.insecure { "ws" } else { "wss" };
        format!("{}://{}/api/v3/stream/{}", scheme, address, method)
    }
}

fn transport_error(method: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::new(ErrorKind::Unavailable, "transport", "request", err.to_string())
        .with_attribute("method", method.to_string())
}

fn header_metadata(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: RpcRequest) -> Result<Value, ApiError> {
        let client = self
            .client_for(&request.address)
            .await
            .map_err(|e| transport_error(&request.method, e))?;
        let mut builder = client
            .post(self.rpc_url(&request.address, &request.method))
            .json(&request.body);
        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::new(
                    ErrorKind::Unavailable,
                    "transport",
                    "timeout",
                    format!("{} timed out", request.method),
                )
            } else {
                transport_error(&request.method, e)
            }
        })?;

        let status = response.status();
        let metadata = header_metadata(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&request.method, e))?;
        let body: Value = if bytes.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if status.is_success() {
            return Ok(body);
        }
        let mut err = ApiError::from_response_body(status.as_u16(), &body);
        err.metadata = metadata;
        Err(err)
    }

    async fn open_stream(&self, request: RpcRequest) -> Result<RpcStream, ApiError> {
        let url = self.stream_url(&request.address, &request.method);
        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| transport_error(&request.method, e))?;
        if let Some(bearer) = &request.bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", bearer))
                .map_err(|e| transport_error(&request.method, e))?;
            ws_request.headers_mut().insert("Authorization", value);
        }
        let connector = self
            .tls
            .as_ref()
            .map(|config| Connector::Rustls(config.clone()));

        let (ws_stream, _) = timeout(
            CONNECT_TIMEOUT,
            connect_async_tls_with_config(ws_request, None, false, connector),
        )
        .await
        .map_err(|_| transport_error(&request.method, "connect timed out"))?
        .map_err(|e| transport_error(&request.method, e))?;
        debug!(method = %request.method, "stream opened");

        let (mut write, mut read) = ws_stream.split();
        let (stream, mut outgoing, incoming) = RpcStream::pair();

        if !request.body.is_null() {
            write
                .send(Message::Text(request.body.to_string()))
                .await
                .map_err(|e| transport_error(&request.method, e))?;
        }

        let method = request.method.clone();
        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                if let Err(e) = write.send(Message::Text(message.to_string())).await {
                    warn!(method = %method, error = %e, "stream send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let method = request.method;
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let item = match frame {
                    Ok(Message::Text(text)) => decode_stream_message(&text),
                    Ok(Message::Binary(bytes)) => serde_json::from_slice::<Value>(&bytes)
                        .map_err(|e| transport_error(&method, e)),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => Err(transport_error(&method, e)),
                };
                let failed = item.is_err();
                if incoming.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(stream)
    }

    async fn close(&self) {
        let mut clients = self.clients.lock().await;
        debug!(count = clients.len(), "closing channels");
        clients.clear();
    }
}

/// Stream frames are either `{"result": ...}`, `{"error": ...}` or a bare
/// message.
fn decode_stream_message(text: &str) -> Result<Value, ApiError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ApiError::new(ErrorKind::Internal, "transport", "stream_message", e.to_string()))?;
    if let Some(error) = value.get("error").filter(|e| e.is_object()) {
        let status = error
            .get("http_code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(500);
        return Err(ApiError::from_response_body(status, error));
    }
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("result") => {
            Ok(map.remove("result").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}
