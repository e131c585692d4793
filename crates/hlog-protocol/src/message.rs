//! Framed stream messages.
//!
//! Each message is a standalone JSON object written as one HTTP chunk:
//!
//! ```text
//! { "chunk": "<text>" }
//! { "msg": "<text>", "statusCode": <int> }
//! ```
//!
//! An error message is terminal: the producer closes the stream after it.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A message on the framed JSON stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    /// A unit of log output.
    Chunk {
        /// Log text, in production order.
        chunk: String,
    },
    /// The producer failed; no further messages follow.
    Error {
        /// Human-readable, single-line error message.
        msg: String,
        /// HTTP-style status code describing the failure.
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
}

impl StreamMessage {
    /// Create a chunk message.
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { chunk: text.into() }
    }

    /// Create a terminal error message.
    pub fn error(msg: impl Into<String>, status_code: u16) -> Self {
        Self::Error {
            msg: msg.into(),
            status_code,
        }
    }

    /// Whether this message ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Encode as a single JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}
