//! Authenticated RPC client over a [`Transport`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::retry::RetryPolicy;
use super::stream::RpcStream;
use super::{RpcRequest, Transport};
use crate::auth::Authenticator;
use crate::config::{ServiceAddresses, ServiceRole};
use crate::error::{ApiError, CoreError};

/// Resolves roles to addresses, attaches credentials, gates unknown hosts and
/// retries. One per process.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    addresses: ServiceAddresses,
    auth: Option<Arc<Authenticator>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    allow_unknown_hosts: bool,
    hosts_checked: OnceCell<()>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        addresses: ServiceAddresses,
        auth: Option<Arc<Authenticator>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            addresses,
            auth,
            retry: RetryPolicy::default(),
            cancel,
            allow_unknown_hosts: false,
            hosts_checked: OnceCell::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_allow_unknown_hosts(mut self, allow: bool) -> Self {
        self.allow_unknown_hosts = allow;
        self
    }

    pub fn addresses(&self) -> &ServiceAddresses {
        &self.addresses
    }

    pub fn is_enabled(&self, role: ServiceRole) -> bool {
        self.addresses.is_enabled(role)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn bearer(&self) -> Result<Option<String>, CoreError> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        self.hosts_checked
            .get_or_try_init(|| async {
                auth.check_known_hosts(&self.addresses.known_hosts(), self.allow_unknown_hosts)
                    .await
            })
            .await?;
        Ok(Some(auth.bearer().await?))
    }

    async fn request(&self, role: ServiceRole, method: &str, body: Value) -> Result<RpcRequest, CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Api(ApiError::cancelled()));
        }
        let address = self.addresses.get(role)?.to_string();
        Ok(RpcRequest {
            role,
            address,
            method: method.to_string(),
            body,
            bearer: self.bearer().await?,
        })
    }

    /// Unary call to `method` on the backend with `role`.
    pub async fn call(&self, role: ServiceRole, method: &str, body: Value) -> Result<Value, CoreError> {
        let request = self.request(role, method, body).await?;
        debug!(role = %role, method, "calling");
        let response = self
            .retry
            .run(&self.cancel, || self.transport.call(request.clone()))
            .await?;
        Ok(response)
    }

    /// Unary call with a typed response.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        role: ServiceRole,
        method: &str,
        body: Value,
    ) -> Result<T, CoreError> {
        let response = self.call(role, method, body).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Open a stream. Opening is retried like a unary call.
    pub async fn open_stream(
        &self,
        role: ServiceRole,
        method: &str,
        initial: Value,
    ) -> Result<RpcStream, CoreError> {
        let request = self.request(role, method, initial).await?;
        debug!(role = %role, method, "opening stream");
        let stream = self
            .retry
            .run(&self.cancel, || self.transport.open_stream(request.clone()))
            .await?;
        Ok(stream)
    }

    /// Close all channels.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::error::ErrorKind;
    use crate::storage::{Credentials, CredentialsStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn addresses() -> ServiceAddresses {
        ServiceAddresses::for_host("eu1.example.com", false)
    }

    #[tokio::test]
    async fn test_call_attaches_bearer_and_address() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialsStore::in_dir(tmp.path());
        store
            .put(
                "eu1",
                Credentials {
                    api_key: Some("NNSXS.key".to_string()),
                    hosts: vec!["eu1.example.com".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let auth = Arc::new(Authenticator::new(store, "eu1", None));
        let mock = Arc::new(MockTransport::new());
        mock.on("ttn.lorawan.v3.ApplicationRegistry/Get", |_| Ok(json!({"name": "App"})));

        let client = ApiClient::new(mock.clone(), addresses(), Some(auth), CancellationToken::new());
        let app = client
            .call(
                ServiceRole::Identity,
                "ttn.lorawan.v3.ApplicationRegistry/Get",
                json!({"application_ids": {"application_id": "app1"}}),
            )
            .await
            .unwrap();
        assert_eq!(app["name"], "App");

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].bearer.as_deref(), Some("NNSXS.key"));
        assert_eq!(calls[0].address, "eu1.example.com:8885");
    }

    #[tokio::test]
    async fn test_unknown_host_blocks_every_call() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialsStore::in_dir(tmp.path());
        store
            .put(
                "eu1",
                Credentials {
                    api_key: Some("NNSXS.key".to_string()),
                    hosts: vec!["other.example.com".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let auth = Arc::new(Authenticator::new(store, "eu1", None));
        let mock = Arc::new(MockTransport::new());
        let client = ApiClient::new(mock.clone(), addresses(), Some(auth), CancellationToken::new());
        let err = client
            .call(ServiceRole::Identity, "ttn.lorawan.v3.ApplicationRegistry/Get", json!({}))
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "unknown_host");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_role_fails_before_dialing() {
        let mut addresses = addresses();
        addresses.set_enabled(ServiceRole::Join, false);
        let mock = Arc::new(MockTransport::new());
        let client = ApiClient::new(mock.clone(), addresses, None, CancellationToken::new());
        let err = client
            .call(ServiceRole::Join, "ttn.lorawan.v3.JsEndDeviceRegistry/Get", json!({}))
            .await
            .unwrap_err()
            .to_api_error();
        assert_eq!(err.name, "join_server_disabled");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_resource_exhausted() {
        let mock = Arc::new(MockTransport::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        mock.on("ttn.lorawan.v3.ApplicationRegistry/List", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut err = ApiError::new(ErrorKind::ResourceExhausted, "ratelimit", "rate_limited", "slow down");
                err.metadata.insert("x-rate-limit-retry".to_string(), "1".to_string());
                Err(err)
            } else {
                Ok(json!({"applications": []}))
            }
        });
        let client = ApiClient::new(mock.clone(), addresses(), None, CancellationToken::new());
        client
            .call(ServiceRole::Identity, "ttn.lorawan.v3.ApplicationRegistry/List", json!({}))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_client_sends_nothing() {
        let mock = Arc::new(MockTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = ApiClient::new(mock.clone(), addresses(), None, cancel);
        let err = client
            .call(ServiceRole::Identity, "ttn.lorawan.v3.ApplicationRegistry/List", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(mock.calls().is_empty());
    }
}
