//! Retry policy with server-hinted backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::error::ApiError;

/// Headers a server uses to say when to retry, in order of preference.
const RETRY_HEADERS: &[&str] = &["x-rate-limit-retry", "retry-after"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max: u32,
    pub default_timeout: Duration,
    pub enable_metadata: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: 5,
            default_timeout: Duration::from_millis(50),
            enable_metadata: true,
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max: config.retry_max,
            default_timeout: config.retry_default_timeout,
            enable_metadata: config.retry_enable_metadata,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max: 0,
            ..Self::default()
        }
    }

    /// Wait before the next attempt after `err`.
    pub fn delay(&self, err: &ApiError) -> Duration {
        if self.enable_metadata {
            let hinted = RETRY_HEADERS.iter().find_map(|header| {
                err.metadata
                    .get(*header)
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            });
            if let Some(wait) = hinted {
                return wait;
            }
        }
        self.default_timeout
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent. Waiting honours `cancel`.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                result = op() => result,
                _ = cancel.cancelled() => return Err(ApiError::cancelled()),
            };
            match result {
                Err(err) if err.kind.is_retryable() && attempt < self.max => {
                    attempt += 1;
                    let wait = self.delay(&err);
                    debug!(attempt, ?wait, error = %err, "retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(ApiError::cancelled()),
                    }
                }
                other => return other,
            }
        }
    }
}
