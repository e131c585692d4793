//! Streaming sessions and the abort signal.
//!
//! A session lives exactly as long as one HTTP exchange. Its abort flag is
//! set once, either by the consumer disconnecting or by the producer
//! finishing, and gates every further write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

/// Cooperative cancellation signal observed by producers.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Whether the session has been aborted.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the session is aborted.
    ///
    /// Never resolves if the owning session is dropped without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Setter side of an [`AbortSignal`].
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Set the abort flag.
    ///
    /// Returns `true` only for the call that actually set it.
    pub fn abort(&self) -> bool {
        self.tx.send_if_modified(|aborted| {
            if *aborted {
                false
            } else {
                *aborted = true;
                true
            }
        })
    }

    /// Whether the flag is already set.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a connected abort handle and signal.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The producer finished and the response ended cleanly.
    Completed,
    /// The consumer disconnected first.
    Aborted,
    /// The producer or a write failed.
    Failed,
}

/// One logical streaming attempt.
#[derive(Debug)]
pub struct StreamSession {
    /// Identifier used in log context.
    pub id: Uuid,
    /// Target instance.
    pub instance_id: String,
    /// Target terminal.
    pub terminal_id: String,
    /// Bytes of output the consumer already has.
    pub cursor: Option<u64>,
    /// When the request was received.
    pub started_at: DateTime<Utc>,
    abort: AbortHandle,
    signal: AbortSignal,
}

impl StreamSession {
    /// Create a session for one request.
    pub fn new(instance_id: impl Into<String>, terminal_id: impl Into<String>, cursor: Option<u64>) -> Self {
        let (abort, signal) = abort_pair();
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            terminal_id: terminal_id.into(),
            cursor,
            started_at: Utc::now(),
            abort,
            signal,
        }
    }

    /// Signal handed to the log source.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Handle used by the transport to report a consumer disconnect.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Whether the session is aborted.
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Mark the producer side as finished.
    ///
    /// Returns `false` if the consumer had already aborted the session.
    pub fn finish(&self) -> bool {
        self.abort.abort()
    }
}
