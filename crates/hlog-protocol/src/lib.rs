//! Headless Log Protocol Types
//!
//! Defines the wire messages exchanged between the log stream server and
//! its watchers, plus the incremental decoders a watcher uses to turn an
//! HTTP body into messages.

pub mod decoder;
pub mod error;
pub mod format;
pub mod message;
pub mod urls;

pub use decoder::{FrameDecoder, StreamDecoder, TextDecoder};
pub use error::ProtocolError;
pub use format::WireFormat;
pub use message::StreamMessage;
pub use urls::HeadlessLogUrls;

/// Route prefix for the framed JSON stream and its metadata endpoint.
pub const HEADLESS_LOG_ROUTE: &str = "/headless-logs";

/// Route prefix for the legacy plain-text stream (keyed by workspace id).
pub const WORKSPACE_LOG_ROUTE: &str = "/workspace-logs";

/// Query parameter carrying the number of bytes a watcher already delivered.
pub const CURSOR_QUERY_PARAM: &str = "cursor";

/// Delay between reconnect attempts of a watcher, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Message sent in the trailing error frame when the producer fails.
pub const STREAM_ERROR_MESSAGE: &str = "error streaming headless logs";
