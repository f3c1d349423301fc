//! In-memory transport for tests.
//!
//! Handlers are registered per method; every call is recorded. Methods with
//! no handler fail with `unimplemented`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::stream::RpcStream;
use super::{RpcRequest, Transport};
use crate::config::ServiceRole;
use crate::error::{ApiError, ErrorKind};

type Handler = Arc<dyn Fn(&Value) -> Result<Value, ApiError> + Send + Sync>;

/// A call as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: ServiceRole,
    pub address: String,
    pub method: String,
    pub body: Value,
    pub bearer: Option<String>,
}

#[derive(Default)]
struct StreamScript {
    responses: Vec<Result<Value, ApiError>>,
    sent: Arc<Mutex<Vec<Value>>>,
    /// Keep the stream open after the last response.
    hold_open: bool,
}

#[derive(Default)]
pub struct MockTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    streams: Mutex<HashMap<String, StreamScript>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `method` with `handler`, replacing any previous handler.
    pub fn on<F>(&self, method: &str, handler: F) -> &Self
    where
        F: Fn(&Value) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        lock(&self.handlers).insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Script a stream: `responses` are delivered in order, then the stream
    /// ends. Returns the log of messages the client sends on it.
    pub fn on_stream(
        &self,
        method: &str,
        responses: Vec<Result<Value, ApiError>>,
    ) -> Arc<Mutex<Vec<Value>>> {
        self.script_stream(method, responses, false)
    }

    /// Like `on_stream`, but the stream stays open after the last response
    /// until the client drops its end.
    pub fn on_open_stream(
        &self,
        method: &str,
        responses: Vec<Result<Value, ApiError>>,
    ) -> Arc<Mutex<Vec<Value>>> {
        self.script_stream(method, responses, true)
    }

    fn script_stream(
        &self,
        method: &str,
        responses: Vec<Result<Value, ApiError>>,
        hold_open: bool,
    ) -> Arc<Mutex<Vec<Value>>> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        lock(&self.streams).insert(
            method.to_string(),
            StreamScript {
                responses,
                sent: sent.clone(),
                hold_open,
            },
        );
        sent
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Methods called, in order.
    pub fn methods(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.method.clone()).collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, request: &RpcRequest) {
        lock(&self.calls).push(RecordedCall {
            role: request.role,
            address: request.address.clone(),
            method: request.method.clone(),
            body: request.body.clone(),
            bearer: request.bearer.clone(),
        });
    }
}

fn unimplemented(method: &str) -> ApiError {
    ApiError::new(
        ErrorKind::Internal,
        "mock",
        "unimplemented",
        format!("no handler for `{}`", method),
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, request: RpcRequest) -> Result<Value, ApiError> {
        self.record(&request);
        let handler = lock(&self.handlers).get(&request.method).cloned();
        match handler {
            Some(handler) => handler(&request.body),
            None => Err(unimplemented(&request.method)),
        }
    }

    async fn open_stream(&self, request: RpcRequest) -> Result<RpcStream, ApiError> {
        self.record(&request);
        let script = lock(&self.streams)
            .remove(&request.method)
            .ok_or_else(|| unimplemented(&request.method))?;

        let (stream, mut outgoing, incoming) = RpcStream::pair();
        let sent = script.sent;
        if !request.body.is_null() {
            lock(&sent).push(request.body.clone());
        }
        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                lock(&sent).push(message);
            }
        });
        tokio::spawn(async move {
            for response in script.responses {
                if incoming.send(response).await.is_err() {
                    return;
                }
            }
            if script.hold_open {
                incoming.closed().await;
            }
        });
        Ok(stream)
    }
}
