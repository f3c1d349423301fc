//! RPC transport.
//!
//! Backend RPCs are reached through their HTTP/JSON binding: unary calls are
//! `POST /api/v3/rpc/<package.Service>/<Method>` and streams are WebSockets at
//! `/api/v3/stream/<package.Service>/<Method>` carrying one JSON message per
//! frame. [`Transport`] abstracts the wire so the layers above can run
//! against an in-memory transport in tests.

pub mod client;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod retry;
pub mod stream;
pub mod tls;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ServiceRole;
use crate::error::ApiError;

pub use client::ApiClient;
pub use http::HttpTransport;
pub use retry::RetryPolicy;
pub use stream::RpcStream;

/// A single RPC as handed to a transport.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub role: ServiceRole,
    pub address: String,
    /// `<package.Service>/<Method>`.
    pub method: String,
    pub body: Value,
    pub bearer: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Unary call.
    async fn call(&self, request: RpcRequest) -> Result<Value, ApiError>;

    /// Open a stream. `request.body` is sent as the first message when it is
    /// not null.
    async fn open_stream(&self, request: RpcRequest) -> Result<RpcStream, ApiError>;

    /// Close all open channels.
    async fn close(&self) {}
}
