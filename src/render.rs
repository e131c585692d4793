//! Terminal rendering for watched logs.

use std::io::Write;

use crate::watcher::LogConsumer;

/// Color used for producer error lines (xterm 256-color red).
const ERROR_COLOR: &str = "\x1b[38;5;196m";
const RESET: &str = "\x1b[0m";

/// Writes chunks verbatim, flushing after each so output appears live.
pub struct TerminalRenderer<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, color: true }
    }

    /// Disable ANSI colors in error lines.
    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_all(&mut self, text: &str) {
        // A closed stdout must not kill the watch; the next dispose will.
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::debug!(error = %e, "failed to write log output");
        }
    }
}

impl<W: Write + Send + 'static> LogConsumer for TerminalRenderer<W> {
    fn on_chunk(&mut self, chunk: String) {
        self.write_all(&chunk);
    }

    fn on_producer_error(&mut self, msg: &str, status_code: u16) {
        let line = if self.color {
            format!("\n{}{} ({}){}\n", ERROR_COLOR, msg, status_code, RESET)
        } else {
            format!("\n{} ({})\n", msg, status_code)
        };
        self.write_all(&line);
    }
}
