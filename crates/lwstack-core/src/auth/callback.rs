//! Loopback HTTP server receiving the OAuth redirect.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ApiError, CoreError, ErrorKind};

pub const DEFAULT_CALLBACK_ADDRESS: &str = "localhost:11885";
pub const CALLBACK_PATH: &str = "/oauth/callback";

pub fn redirect_uri(address: &str) -> String {
    format!("http://{}{}", address, CALLBACK_PATH)
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

type CodeSender = Arc<Mutex<Option<oneshot::Sender<Result<String, ApiError>>>>>;

#[derive(Clone)]
struct CallbackState {
    expected_state: String,
    sender: CodeSender,
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    if params.state.as_deref() != Some(state.expected_state.as_str()) {
        warn!("OAuth callback with unexpected state");
        return (StatusCode::BAD_REQUEST, Html("<p>Invalid state. Please retry the login.</p>"));
    }
    let result = match (params.code, params.error) {
        (Some(code), _) => Ok(code),
        (None, Some(error)) => Err(ApiError::new(
            ErrorKind::Unauthenticated,
            "oauth",
            &error,
            params.error_description.unwrap_or_else(|| error.clone()),
        )),
        (None, None) => Err(ApiError::invalid_argument(
            "oauth",
            "no_code",
            "callback did not carry an authorization code",
        )),
    };
    let ok = result.is_ok();
    if let Some(sender) = state.sender.lock().await.take() {
        let _ = sender.send(result);
    }
    if ok {
        (StatusCode::OK, Html("<p>Login successful. You can close this window.</p>"))
    } else {
        (StatusCode::UNAUTHORIZED, Html("<p>Login failed. See the terminal for details.</p>"))
    }
}

/// A bound callback server waiting for one redirect.
pub struct CallbackServer {
    local_addr: SocketAddr,
    code_rx: oneshot::Receiver<Result<String, ApiError>>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl CallbackServer {
    pub async fn bind(address: &str, expected_state: String) -> Result<Self, CoreError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let (tx, code_rx) = oneshot::channel();
        let state = CallbackState {
            expected_state,
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "OAuth callback server failed");
            }
        });
        debug!(address, "OAuth callback server listening");

        Ok(Self {
            local_addr,
            code_rx,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the authorization code, then stop the server.
    pub async fn code(self, cancel: &CancellationToken) -> Result<String, CoreError> {
        let result = tokio::select! {
            received = self.code_rx => match received {
                Ok(result) => result.map_err(CoreError::from),
                Err(_) => Err(CoreError::Other("callback server stopped".to_string())),
            },
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
        };
        self.shutdown.cancel();
        let _ = self.handle.await;
        result
    }
}
