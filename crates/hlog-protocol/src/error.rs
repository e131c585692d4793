//! Error types for the wire protocol.

/// Errors raised while producing wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode stream message: {0}")]
    Encode(#[from] serde_json::Error),
}
