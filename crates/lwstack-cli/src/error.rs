//! Error types for the lwstack CLI.
//!
//! CliError wraps CoreError from the shared library and adds CLI-specific
//! variants. Every error renders as a namespaced envelope on stderr.

use colored::*;
use lwstack_core::error::{ApiError, CoreError, ErrorKind};
use thiserror::Error;

pub use lwstack_core::error::{CodecError, ConfigError, StorageError, TransportError};

/// Exit codes for the CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    /// 128 + SIGHUP
    pub const HANGUP: i32 = 129;
    /// 128 + SIGINT
    pub const INTERRUPTED: i32 = 130;
    /// 128 + SIGTERM
    pub const TERMINATED: i32 = 143;
}

/// Main error type for the CLI
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    /// Exit code for this error. Cancellation caused by a signal exits with
    /// the code of that signal.
    pub fn exit_code(&self, signal_code: Option<i32>) -> i32 {
        match (self.kind(), signal_code) {
            (ErrorKind::Cancelled, Some(code)) => code,
            _ => exit_codes::GENERAL_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CliError::Core(e) => e.kind(),
            CliError::Io(_) | CliError::Other(_) => ErrorKind::Internal,
            CliError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// The error as a namespaced envelope.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            CliError::Core(e) => e.to_api_error(),
            CliError::Io(e) => ApiError::new(ErrorKind::Internal, "io", "io", e.to_string()),
            CliError::InvalidArgument(msg) => ApiError::invalid_argument("cli", "invalid_argument", msg.clone()),
            CliError::Other(msg) => ApiError::new(ErrorKind::Internal, "cli", "internal", msg.clone()),
        }
    }

    /// `ERROR <namespace>:<name>: <message>` followed by attributes and the
    /// cause chain, each cause indented two spaces deeper than the last.
    pub fn render(&self) -> String {
        let err = self.to_api_error();
        let mut lines = vec![format!("{} {}", "ERROR".red().bold(), err)];
        for (key, value) in &err.attributes {
            lines.push(format!("  {}={}", key.dimmed(), attribute(value)));
        }
        for (depth, cause) in err.causes().enumerate() {
            lines.push(format!("{}{}", "  ".repeat(depth + 1), cause));
        }
        lines.join("\n")
    }
}

fn attribute(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Conversions from core error subtypes to CliError
impl From<ApiError> for CliError {
    fn from(e: ApiError) -> Self {
        CliError::Core(CoreError::Api(e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Core(CoreError::Config(e))
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Core(CoreError::Storage(e))
    }
}

impl From<CodecError> for CliError {
    fn from(e: CodecError) -> Self {
        CliError::Core(CoreError::Codec(e))
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Core(CoreError::Transport(e))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Core(CoreError::Json(e))
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_indents_cause_chain() {
        colored::control::set_override(false);
        let err = ApiError::failed_precondition("cli", "end_device_claim", "could not claim end device")
            .with_cause(
                ApiError::not_found("dcs", "join_eui", "JoinEUI not found")
                    .with_cause(ApiError::unauthenticated("is", "token", "token expired")),
            );
        let rendered = CliError::from(err).render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "ERROR cli:end_device_claim: could not claim end device");
        assert_eq!(lines[1], "  dcs:join_eui: JoinEUI not found");
        assert_eq!(lines[2], "    is:token: token expired");
    }

    #[test]
    fn test_cancellation_exits_with_signal_code() {
        let err = CliError::from(ApiError::cancelled());
        assert_eq!(err.exit_code(Some(exit_codes::INTERRUPTED)), 130);
        assert_eq!(err.exit_code(None), exit_codes::GENERAL_ERROR);

        let other = CliError::InvalidArgument("bad".to_string());
        assert_eq!(other.exit_code(Some(exit_codes::TERMINATED)), exit_codes::GENERAL_ERROR);
    }
}
