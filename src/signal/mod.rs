//! Interrupt handling for the watch command
//!
//! On the first SIGINT the watcher is disposed: the in-flight read is
//! cancelled, no further chunks are rendered and no retry is scheduled.
//! On a second SIGINT the process exits immediately.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code used for an interrupted watch.
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// What to do about an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Dispose the watcher and let it wind down.
    Dispose,
    /// The user insisted; exit now.
    ImmediateExit,
    Ignore,
}

/// Counts interrupts received by the process.
#[derive(Debug, Default)]
pub struct SignalState {
    received: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u8 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn is_dispose_requested(&self) -> bool {
        self.received() >= 1
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.received() >= 2
    }

    /// Record one interrupt and decide what it means.
    pub fn handle_signal(&self) -> SignalAction {
        let previous = self
            .received
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or(u8::MAX);
        match previous {
            0 => SignalAction::Dispose,
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Owns the process-wide Ctrl-C hook.
#[derive(Default)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the hook. `on_dispose` runs once, on the handler thread, for
    /// the first interrupt. Installing twice per process fails.
    pub fn install<F>(&self, on_dispose: F) -> Result<(), ctrlc::Error>
    where
        F: Fn() + Send + 'static,
    {
        let state = self.state.clone();
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::Dispose => {
                eprintln!("\nInterrupted, closing log stream (press Ctrl-C again to exit now)");
                on_dispose();
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nInterrupted again, exiting");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}
