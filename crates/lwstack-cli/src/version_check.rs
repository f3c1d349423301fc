//! Background check for a newer release.
//!
//! The check runs alongside the command and gets a short grace period at
//! shutdown; a slow or failing check never delays or fails the command.

use std::time::Duration;

use lwstack_core::config::Config;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long the check may delay exit.
pub const GRACE_PERIOD: Duration = Duration::from_millis(500);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// `v1.2.3` or `1.2.3` as a comparable tuple.
fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let raw = raw.trim().trim_start_matches('v');
    let core = raw.split(['-', '+']).next().unwrap_or(raw);
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    Some((major, minor, patch))
}

fn is_newer(latest: &str, current: &str) -> bool {
    match (parse_version(latest), parse_version(current)) {
        (Some(latest), Some(current)) => latest > current,
        _ => false,
    }
}

async fn check(url: String) -> Result<(), reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(format!("lwstack/{}", env!("CARGO_PKG_VERSION")))
        .build()?;
    let release: Release = client.get(&url).send().await?.error_for_status()?.json().await?;
    let current = env!("CARGO_PKG_VERSION");
    if is_newer(&release.tag_name, current) {
        warn!(
            current,
            latest = release.tag_name.as_str(),
            "a newer version of lwstack is available"
        );
    } else {
        debug!(current, latest = release.tag_name.as_str(), "lwstack is up to date");
    }
    Ok(())
}

/// Start the check unless it is disabled.
pub fn spawn(config: &Config) -> Option<JoinHandle<()>> {
    if config.skip_version_check {
        return None;
    }
    let url = config.version_check_url.clone();
    Some(tokio::spawn(async move {
        if let Err(e) = check(url).await {
            debug!(error = %e, "version check failed");
        }
    }))
}

/// Wait for the check for at most [`GRACE_PERIOD`].
pub async fn finish(handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    if tokio::time::timeout(GRACE_PERIOD, handle).await.is_err() {
        debug!("version check did not finish in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(is_newer("v3.30.1", "3.30.0"));
        assert!(is_newer("v4.0", "3.99.99"));
        assert!(!is_newer("v3.30.0", "3.30.0"));
        assert!(!is_newer("3.29.9", "3.30.0"));
        assert!(!is_newer("nightly", "3.30.0"));
        assert_eq!(parse_version("v1.2.3-rc.1"), Some((1, 2, 3)));
    }

    #[tokio::test]
    async fn test_finish_without_check_returns_immediately() {
        finish(None).await;
    }
}
