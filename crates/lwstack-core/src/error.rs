//! Error types for the lwstack core.
//!
//! Two layers live here. `CoreError` and its sub-enums are the internal
//! `thiserror` errors produced by local operations (config, storage, codec,
//! transport). `ApiError` is the stable, namespaced envelope that every
//! failure is eventually rendered as: it mirrors the error details returned by
//! the backend services and carries a cause chain.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable error kinds shared with the backend services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Aborted,
    Unauthenticated,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    Cancelled,
    Corruption,
    Internal,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Internal => "internal",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Map an RPC status code (as carried in the `code` field of an error
    /// body) to a kind. Data loss is reported as corruption.
    pub fn from_rpc_code(code: i64) -> Self {
        match code {
            1 => ErrorKind::Cancelled,
            3 | 11 => ErrorKind::InvalidArgument,
            4 | 14 => ErrorKind::Unavailable,
            5 => ErrorKind::NotFound,
            6 => ErrorKind::AlreadyExists,
            7 => ErrorKind::PermissionDenied,
            8 => ErrorKind::ResourceExhausted,
            9 => ErrorKind::FailedPrecondition,
            10 => ErrorKind::Aborted,
            13 | 12 => ErrorKind::Internal,
            15 => ErrorKind::Corruption,
            16 => ErrorKind::Unauthenticated,
            _ => ErrorKind::Unknown,
        }
    }

    /// Fallback mapping used when a response carries no error body.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidArgument,
            401 => ErrorKind::Unauthenticated,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::AlreadyExists,
            412 => ErrorKind::FailedPrecondition,
            429 => ErrorKind::ResourceExhausted,
            499 => ErrorKind::Cancelled,
            500 => ErrorKind::Internal,
            502..=504 => ErrorKind::Unavailable,
            _ => ErrorKind::Unknown,
        }
    }

    /// Whether a call failing with this kind may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ResourceExhausted | ErrorKind::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced error envelope.
///
/// Rendered to the user as `ERROR <namespace>:<name>: <message>` followed by
/// the cause chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub namespace: String,
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ApiError>>,
    /// Response headers of the failed call, used by the retry layer.
    #[serde(skip)]
    pub metadata: BTreeMap<String, String>,
}

impl ApiError {
    pub fn new(
        kind: ErrorKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            message: message.into(),
            attributes: BTreeMap::new(),
            cause: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn invalid_argument(ns: &str, name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, ns, name, message)
    }

    pub fn not_found(ns: &str, name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, ns, name, message)
    }

    pub fn failed_precondition(ns: &str, name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, ns, name, message)
    }

    pub fn unauthenticated(ns: &str, name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, ns, name, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cli", "cancelled", "operation cancelled")
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: ApiError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Iterate over this error's causes, nearest first.
    pub fn causes(&self) -> Causes<'_> {
        Causes {
            next: self.cause.as_deref(),
        }
    }

    /// Decode a backend error body.
    ///
    /// The body has the shape `{"code", "message", "details": [...]}` where
    /// the first detail carries the namespace, name, message format,
    /// attributes and an optional nested cause. Bodies without details fall
    /// back to the HTTP status.
    pub fn from_response_body(status: u16, body: &Value) -> Self {
        let kind = body
            .get("code")
            .and_then(Value::as_i64)
            .map(ErrorKind::from_rpc_code)
            .unwrap_or_else(|| ErrorKind::from_http_status(status));
        let fallback_message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with HTTP status {}", status));

        match body
            .get("details")
            .and_then(Value::as_array)
            .and_then(|details| details.first())
        {
            Some(detail) => Self::from_detail(kind, detail, &fallback_message),
            None => Self::new(kind, "rpc", kind.as_str(), fallback_message),
        }
    }

    fn from_detail(kind: ErrorKind, detail: &Value, fallback_message: &str) -> Self {
        let attributes: BTreeMap<String, Value> = detail
            .get("attributes")
            .and_then(Value::as_object)
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let message = detail
            .get("message_format")
            .and_then(Value::as_str)
            .map(|format| render_message_format(format, &attributes))
            .unwrap_or_else(|| fallback_message.to_string());
        let cause_kind = detail
            .get("cause")
            .and_then(|c| c.get("code"))
            .and_then(Value::as_i64)
            .map(ErrorKind::from_rpc_code)
            .unwrap_or(kind);

        Self {
            kind,
            namespace: str_field(detail, "namespace").unwrap_or_else(|| "rpc".to_string()),
            name: str_field(detail, "name").unwrap_or_else(|| kind.as_str().to_string()),
            message,
            attributes,
            cause: detail
                .get("cause")
                .filter(|c| c.is_object())
                .map(|c| Box::new(Self::from_detail(cause_kind, c, ""))),
            metadata: BTreeMap::new(),
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Substitute `{name}` placeholders in a backend message format.
fn render_message_format(format: &str, attributes: &BTreeMap<String, Value>) -> String {
    let mut out = format.to_string();
    for (key, value) in attributes {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&format!("{{{}}}", key), &rendered);
    }
    out
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.namespace, self.name, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Iterator over an [`ApiError`] cause chain.
pub struct Causes<'a> {
    next: Option<&'a ApiError>,
}

impl<'a> Iterator for Causes<'a> {
    type Item = &'a ApiError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause.as_deref();
        Some(current)
    }
}

/// Core error type for shared operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Api(#[from] ApiError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Api(e) => e.kind,
            CoreError::Config(_) | CoreError::Codec(_) | CoreError::Json(_) => {
                ErrorKind::InvalidArgument
            }
            CoreError::Transport(_) => ErrorKind::Unavailable,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Storage(_) | CoreError::Io(_) | CoreError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Render any core error as a namespaced envelope.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            CoreError::Api(e) => e.clone(),
            CoreError::Config(e) => ApiError::new(self.kind(), "config", e.name(), e.to_string()),
            CoreError::Storage(e) => {
                ApiError::new(self.kind(), "credentials", e.name(), e.to_string())
            }
            CoreError::Codec(e) => ApiError::new(self.kind(), "lorawan", e.name(), e.to_string()),
            CoreError::Transport(e) => {
                ApiError::new(self.kind(), "transport", e.name(), e.to_string())
            }
            CoreError::Io(e) => ApiError::new(self.kind(), "io", "io", e.to_string()),
            CoreError::Json(e) => ApiError::new(self.kind(), "io", "json", e.to_string()),
            CoreError::Cancelled => ApiError::cancelled(),
            CoreError::Other(msg) => ApiError::new(self.kind(), "cli", "internal", msg.clone()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Config file already exists: {0}")]
    FileExists(String),

    #[error("No config directory available on this platform")]
    NoConfigDir,
}

impl ConfigError {
    fn name(&self) -> &'static str {
        match self {
            ConfigError::Parse { .. } => "parse",
            ConfigError::InvalidValue { .. } => "invalid_value",
            ConfigError::InvalidAddress(_) => "invalid_address",
            ConfigError::FileExists(_) => "file_exists",
            ConfigError::NoConfigDir => "no_config_dir",
        }
    }
}

/// Credentials storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access storage directory: {0}")]
    DirectoryAccess(String),

    #[error("Failed to lock credentials file: {0}")]
    Lock(String),

    #[error("Corrupt credentials file: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

impl StorageError {
    fn name(&self) -> &'static str {
        match self {
            StorageError::DirectoryAccess(_) => "directory_access",
            StorageError::Lock(_) => "lock",
            StorageError::Corrupt(_) => "corrupt",
            StorageError::Io(_) => "io",
            StorageError::Serialization(_) => "serialization",
        }
    }
}

/// LoRaWAN codec errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("frame too short: need at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("invalid length for {what}: expected {expected}, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported message type {0:#05b}")]
    UnsupportedMType(u8),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    #[error("unknown MAC version: {0}")]
    UnknownMacVersion(String),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("{0}")]
    Malformed(String),
}

impl CodecError {
    fn name(&self) -> &'static str {
        match self {
            CodecError::TooShort { .. } => "payload_length",
            CodecError::InvalidLength { .. } => "field_length",
            CodecError::UnsupportedMType(_) => "m_type",
            CodecError::InvalidHex(_) => "hex",
            CodecError::InvalidBase64(_) => "base64",
            CodecError::UnknownMacVersion(_) => "mac_version",
            CodecError::MissingField(_) => "missing_field",
            CodecError::Malformed(_) => "malformed",
        }
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Stream closed")]
    StreamClosed,
}

impl TransportError {
    fn name(&self) -> &'static str {
        match self {
            TransportError::Http(_) => "http",
            TransportError::WebSocket(_) => "websocket",
            TransportError::Tls(_) => "tls",
            TransportError::InvalidAddress(_) => "invalid_address",
            TransportError::Timeout(_) => "timeout",
            TransportError::StreamClosed => "stream_closed",
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::invalid_argument("cli", "conflicting_paths", "paths conflict");
        assert_eq!(err.to_string(), "cli:conflicting_paths: paths conflict");
    }

    #[test]
    fn test_from_response_body_with_details() {
        let body = json!({
            "code": 5,
            "message": "error:pkg/identityserver/store:application_not_found",
            "details": [{
                "namespace": "pkg/identityserver/store",
                "name": "application_not_found",
                "message_format": "application `{application_id}` not found",
                "attributes": {"application_id": "app1"},
                "cause": {
                    "namespace": "pkg/store",
                    "name": "not_found",
                    "message_format": "not found"
                }
            }]
        });
        let err = ApiError::from_response_body(404, &body);
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.namespace, "pkg/identityserver/store");
        assert_eq!(err.message, "application `app1` not found");
        let causes: Vec<_> = err.causes().collect();
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].name, "not_found");
    }

    #[test]
    fn test_from_response_body_without_details_uses_status() {
        let err = ApiError::from_response_body(503, &json!({}));
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.kind.is_retryable());
    }

    #[test]
    fn test_core_error_to_api_error() {
        let err = CoreError::Codec(CodecError::MissingField("FPort"));
        let api = err.to_api_error();
        assert_eq!(api.namespace, "lorawan");
        assert_eq!(api.kind, ErrorKind::InvalidArgument);
    }
}
