//! Bidirectional message streams.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ErrorKind};

/// Capacity of the per-stream channels.
pub const STREAM_BUFFER: usize = 64;

/// Outgoing half of a stream.
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<Value>,
}

impl StreamSender {
    pub async fn send(&self, message: Value) -> Result<(), ApiError> {
        self.tx.send(message).await.map_err(|_| stream_closed())
    }
}

/// Incoming half of a stream.
#[derive(Debug)]
pub struct StreamReceiver {
    rx: mpsc::Receiver<Result<Value, ApiError>>,
}

impl StreamReceiver {
    /// Next message, `None` once the stream ended.
    pub async fn recv(&mut self) -> Option<Result<Value, ApiError>> {
        self.rx.recv().await
    }

    /// Next message, or a cancelled error when `cancel` fires first.
    pub async fn recv_until(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<Value, ApiError>> {
        tokio::select! {
            message = self.rx.recv() => message,
            _ = cancel.cancelled() => Some(Err(ApiError::cancelled())),
        }
    }
}

/// An open stream: messages in and out as JSON values.
#[derive(Debug)]
pub struct RpcStream {
    pub sender: StreamSender,
    pub receiver: StreamReceiver,
}

impl RpcStream {
    /// Create a stream and the transport-side ends of its channels.
    pub fn pair() -> (
        Self,
        mpsc::Receiver<Value>,
        mpsc::Sender<Result<Value, ApiError>>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(STREAM_BUFFER);
        (
            Self {
                sender: StreamSender { tx: out_tx },
                receiver: StreamReceiver { rx: in_rx },
            },
            out_rx,
            in_tx,
        )
    }

    pub fn split(self) -> (StreamSender, StreamReceiver) {
        (self.sender, self.receiver)
    }
}

fn stream_closed() -> ApiError {
    ApiError::new(ErrorKind::Unavailable, "transport", "stream_closed", "stream closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_carries_messages_both_ways() {
        let (stream, mut outgoing, incoming) = RpcStream::pair();
        let (sender, mut receiver) = stream.split();

        sender.send(json!({"up": 1})).await.unwrap();
        assert_eq!(outgoing.recv().await, Some(json!({"up": 1})));

        incoming.send(Ok(json!({"down": 1}))).await.unwrap();
        drop(incoming);
        assert_eq!(receiver.recv().await.unwrap().unwrap(), json!({"down": 1}));
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_until_cancelled() {
        let (stream, _outgoing, _incoming) = RpcStream::pair();
        let (_sender, mut receiver) = stream.split();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = receiver.recv_until(&cancel).await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
