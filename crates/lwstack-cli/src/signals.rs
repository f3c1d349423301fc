//! Signal handling.
//!
//! A background task cancels the invocation's cancellation token on the
//! first SIGINT, SIGTERM or SIGHUP. Every RPC, stream receive and stdin read
//! races that token, so the command unwinds with a cancelled error and the
//! process exits with the code of the signal.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::exit_codes;

/// Which signal, if any, cancelled the invocation.
#[derive(Debug, Clone, Default)]
pub struct SignalWatch {
    code: Arc<AtomicI32>,
}

impl SignalWatch {
    /// Exit code of the received signal.
    pub fn received(&self) -> Option<i32> {
        match self.code.load(Ordering::SeqCst) {
            0 => None,
            code => Some(code),
        }
    }

    fn record(&self, code: i32, cancel: &CancellationToken) {
        self.code.store(code, Ordering::SeqCst);
        cancel.cancel();
    }
}

/// Start watching for termination signals.
pub fn spawn(cancel: CancellationToken) -> SignalWatch {
    let watch = SignalWatch::default();
    let task_watch = watch.clone();
    tokio::spawn(async move {
        match wait().await {
            Ok(code) => {
                info!(code, "received signal, cancelling");
                task_watch.record(code, &cancel);
            }
            Err(e) => warn!(error = %e, "could not install signal handlers"),
        }
    });
    watch
}

#[cfg(unix)]
async fn wait() -> std::io::Result<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let code = tokio::select! {
        _ = interrupt.recv() => exit_codes::INTERRUPTED,
        _ = terminate.recv() => exit_codes::TERMINATED,
        _ = hangup.recv() => exit_codes::HANGUP,
    };
    Ok(code)
}

#[cfg(not(unix))]
async fn wait() -> std::io::Result<i32> {
    tokio::signal::ctrl_c().await?;
    Ok(exit_codes::INTERRUPTED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cancels_scope() {
        let cancel = CancellationToken::new();
        let watch = SignalWatch::default();
        assert_eq!(watch.received(), None);
        watch.record(exit_codes::TERMINATED, &cancel);
        assert!(cancel.is_cancelled());
        assert_eq!(watch.received(), Some(143));
    }
}
