//! OAuth 2.0 authorization-code client.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use super::token::TokenResponse;
use crate::error::{ApiError, ErrorKind};

/// Redirect URI used when the user pastes the authorization code.
pub const PASTE_REDIRECT_URI: &str = "code";

pub const CLIENT_ID: &str = "cli";

/// The OAuth server endpoints the CLI uses.
#[async_trait]
pub trait OAuthServer: Send + Sync {
    /// URL the user opens to authorize the CLI.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, ApiError>;

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ApiError>;

    /// Revoke an access or refresh token.
    async fn revoke(&self, token: &str) -> Result<(), ApiError>;
}

/// HTTP client for an OAuth server mounted at `base_url`.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: CLIENT_ID.to_string(),
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<Value, ApiError> {
        debug!(endpoint, "OAuth request");
        let response = self
            .http
            .post(self.endpoint(endpoint))
            .form(form)
            .send()
            .await
            .map_err(|e| {
                ApiError::new(ErrorKind::Unavailable, "oauth", "request", e.to_string())
            })?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        Err(oauth_error(status.as_u16(), &body))
    }
}

/// Decode OAuth error responses, both the RFC 6749 shape and the namespaced
/// error envelope.
fn oauth_error(status: u16, body: &Value) -> ApiError {
    if let Some(code) = body.get("error").and_then(Value::as_str) {
        let kind = match code {
            "invalid_grant" | "invalid_client" | "unauthorized_client" => {
                ErrorKind::Unauthenticated
            }
            "invalid_request" | "unsupported_grant_type" => ErrorKind::InvalidArgument,
            _ => ErrorKind::from_http_status(status),
        };
        let message = body
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(code);
        return ApiError::new(kind, "oauth", code, message);
    }
    let mut err = ApiError::from_response_body(status, body);
    if status == 400 && err.kind == ErrorKind::InvalidArgument {
        err.kind = ErrorKind::Unauthenticated;
    }
    err
}

fn decode_token(body: Value) -> Result<TokenResponse, ApiError> {
    serde_json::from_value(body).map_err(|e| {
        ApiError::new(ErrorKind::Internal, "oauth", "token_response", e.to_string())
    })
}

#[async_trait]
impl OAuthServer for OAuthClient {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, ApiError> {
        Url::parse_with_params(
            &self.endpoint("authorize"),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("state", state),
            ],
        )
        .map(String::from)
        .map_err(|e| ApiError::invalid_argument("oauth", "oauth_server_address", e.to_string()))
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, ApiError> {
        let body = self
            .post_form(
                "token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", &self.client_id),
                ],
            )
            .await?;
        decode_token(body)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let body = self
            .post_form(
                "token",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", &self.client_id),
                ],
            )
            .await?;
        decode_token(body)
    }

    async fn revoke(&self, token: &str) -> Result<(), ApiError> {
        self.post_form("revoke", &[("token", token), ("client_id", &self.client_id)])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authorize_url() {
        let client = OAuthClient::new(reqwest::Client::new(), "https://eu1.example.com/oauth/");
        let url = client
            .authorize_url("http://localhost:11885/oauth/callback", "s1")
            .unwrap();
        assert!(url.starts_with("https://eu1.example.com/oauth/authorize?client_id=cli"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A11885%2Foauth%2Fcallback"));
        assert!(url.contains("state=s1"));
    }

    #[test]
    fn test_invalid_grant_is_unauthenticated() {
        let err = oauth_error(400, &json!({"error": "invalid_grant", "error_description": "expired"}));
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert_eq!(err.name, "invalid_grant");
        assert_eq!(err.message, "expired");
    }
}
