//! Headless Logs
//!
//! Client for following the log output of headless workspace instances.
//! The watcher asks the log server for an instance's stream endpoints,
//! reads the first stream incrementally and reconnects after a fixed delay
//! until the instance is done or the watch is disposed.

pub mod api;
pub mod config;
pub mod render;
pub mod signal;
pub mod telemetry;
pub mod watcher;

pub use api::{http_client, ApiError, HeadlessLogApi, HttpLogApi, StreamClient};
pub use config::{ClientSettings, ConfigError, EffectiveConfig};
pub use render::TerminalRenderer;
pub use signal::{SignalAction, SignalHandler, SignalState};
pub use watcher::{
    Disposer, LogConsumer, LogWatcher, WatchError, WatchHandle, WatchOutcome, WatchSummary,
    WatcherOptions,
};
