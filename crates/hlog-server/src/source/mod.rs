//! Log source adapter contract.
//!
//! A [`LogSource`] produces the console output of one instance terminal and
//! hands it to a [`ChunkHandler`] chunk by chunk. The adapter must await each
//! `on_chunk` call before producing the next chunk and must check the abort
//! signal between emissions.

pub mod directory;

use async_trait::async_trait;

use crate::session::AbortSignal;
use crate::store::{StoreError, WorkspaceInstance};

pub use directory::DirectoryLogSource;

/// Why a chunk could not be delivered to the consumer.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The session was aborted; the adapter should stop quietly.
    #[error("stream aborted")]
    Aborted,

    /// Writing the chunk to the response failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// Errors produced by a log source.
#[derive(Debug, thiserror::Error)]
pub enum LogSourceError {
    #[error("terminal '{terminal_id}' not found for instance '{instance_id}'")]
    TerminalNotFound {
        instance_id: String,
        terminal_id: String,
    },

    #[error("instance '{0}' disappeared while streaming")]
    InstanceGone(String),

    #[error("producer failed: {0}")]
    Producer(String),

    #[error("failed to read log: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl LogSourceError {
    /// Whether the error only reports that the consumer went away.
    pub fn is_aborted(&self) -> bool {
        matches!(self, LogSourceError::Delivery(DeliveryError::Aborted))
    }
}

/// Receives log chunks from a source.
#[async_trait]
pub trait ChunkHandler: Send + Sync {
    /// Deliver one chunk; resolves once the chunk has been written.
    async fn on_chunk(&self, chunk: String) -> Result<(), DeliveryError>;
}

/// Producer of terminal output for workspace instances.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Terminal ids with output for an instance, in a stable order.
    async fn terminals(&self, instance: &WorkspaceInstance) -> Result<Vec<String>, LogSourceError>;

    /// Stream one terminal's output into `on_chunk`.
    ///
    /// Resolves `Ok` when the output naturally ends or the session was
    /// aborted, and `Err` on producer failure.
    async fn stream_log(
        &self,
        instance: &WorkspaceInstance,
        terminal_id: &str,
        on_chunk: &dyn ChunkHandler,
        aborted: AbortSignal,
    ) -> Result<(), LogSourceError>;
}
