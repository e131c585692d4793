//! Chunked response body.
//!
//! The body is fed through a channel holding at most one frame, so a write
//! completes once hyper has taken the previous frame off the channel. The
//! receiving half being dropped (client disconnect) aborts the session.

use std::io;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::session::{AbortHandle, AbortSignal};

/// Frames buffered between the write queue and the transport.
const BODY_CHANNEL_CAPACITY: usize = 1;

/// Errors writing to a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer is gone.
    #[error("response closed by peer")]
    Closed,

    #[error("response write failed: {0}")]
    Failed(String),
}

/// Destination of a session's encoded frames.
#[async_trait]
pub trait ResponseSink: Clone + Send + Sync + 'static {
    /// Write one frame; resolves once the transport accepted it.
    async fn write(&self, bytes: Bytes) -> Result<(), SinkError>;

    /// End the response after a producer failure.
    ///
    /// `trailer` is the terminal error frame of the wire format, if it has
    /// one. Formats without an error frame abort the transfer instead.
    async fn fail(&self, trailer: Option<Bytes>);

    /// End the response cleanly.
    async fn end(&self);
}

/// Sending half of a chunked response body.
#[derive(Debug, Clone)]
pub struct BodySink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

/// Create a streaming body wired to a session's abort flag.
///
/// The disconnect watcher is registered here, before any frame is written.
/// It stops watching once the session is aborted or finished.
pub fn channel(abort: AbortHandle, mut signal: AbortSignal) -> (Body, BodySink) {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

    let watch_tx = tx.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watch_tx.closed() => {
                if abort.abort() {
                    debug!("client disconnected, aborting stream");
                }
            }
            _ = signal.aborted() => {}
        }
    });

    (Body::from_stream(ReceiverStream::new(rx)), BodySink { tx })
}

#[async_trait]
impl ResponseSink for BodySink {
    async fn write(&self, bytes: Bytes) -> Result<(), SinkError> {
        self.tx.send(Ok(bytes)).await.map_err(|_| SinkError::Closed)
    }

    async fn fail(&self, trailer: Option<Bytes>) {
        let item = match trailer {
            Some(frame) => Ok(frame),
            None => Err(io::Error::other("log stream failed")),
        };
        // Nothing left to do if the peer already went away.
        let _ = self.tx.send(item).await;
    }

    async fn end(&self) {
        // The body ends when the last sender is dropped.
    }
}
