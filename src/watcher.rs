//! Log watcher.
//!
//! Follows the log of one instance until the instance is done or the watch
//! is disposed. Each attempt asks for the published stream endpoints, reads
//! the first one incrementally and hands decoded chunks to a consumer. Any
//! end of an attempt (no endpoint yet, HTTP failure, producer error frame,
//! body end) is followed by an is-done check and, if the instance is still
//! running, a fixed retry delay. Retries are unbounded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hlog_protocol::{StreamDecoder, StreamMessage, WireFormat, DEFAULT_RETRY_DELAY_MS};
use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{HeadlessLogApi, StreamClient};

/// Receives decoded log output.
pub trait LogConsumer: Send + 'static {
    /// One chunk of log text, in production order.
    fn on_chunk(&mut self, chunk: String);

    /// The producer reported a failure; the current attempt ends.
    fn on_producer_error(&mut self, msg: &str, status_code: u16) {
        let _ = (msg, status_code);
    }
}

impl<F> LogConsumer for F
where
    F: FnMut(String) + Send + 'static,
{
    fn on_chunk(&mut self, chunk: String) {
        self(chunk)
    }
}

/// Watcher timing and resume policy.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Delay before every reconnect attempt.
    pub retry_delay: Duration,
    /// Ask the server to skip output already delivered on reconnect.
    pub resume: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            resume: true,
        }
    }
}

/// Watch errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch task failed: {0}")]
    Task(String),
}

/// Why a watch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The instance finished.
    Done,
    /// The handle was disposed.
    Disposed,
}

/// Counters for a finished watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub outcome: WatchOutcome,
    /// Attempts that reached the endpoint lookup.
    pub attempts: u32,
    /// Delayed reconnects.
    pub retries: u32,
    /// Chunks handed to the consumer.
    pub chunks: u64,
    /// Bytes of text handed to the consumer.
    pub delivered_bytes: u64,
}

impl WatchSummary {
    fn new() -> Self {
        Self {
            outcome: WatchOutcome::Disposed,
            attempts: 0,
            retries: 0,
            chunks: 0,
            delivered_bytes: 0,
        }
    }
}

/// Terminal followed by the last attempt and bytes delivered from it.
#[derive(Debug, Default)]
struct StreamPosition {
    terminal_id: Option<String>,
    bytes: u64,
}

impl StreamPosition {
    /// Switch to `terminal_id`, returning the resume offset within it.
    ///
    /// Offsets count bytes of one terminal's output, so moving to another
    /// terminal starts it from the beginning.
    fn enter(&mut self, terminal_id: &str) -> Option<u64> {
        if self.terminal_id.as_deref() != Some(terminal_id) {
            self.terminal_id = Some(terminal_id.to_string());
            self.bytes = 0;
        }
        (self.bytes > 0).then_some(self.bytes)
    }
}

/// How one attempt ended.
#[derive(Debug)]
enum AttemptEnd {
    Disposed,
    NoStreams,
    Unavailable(String),
    ProducerError { msg: String, status_code: u16 },
    Ended,
}

/// Reconnecting log watcher.
#[derive(Clone)]
pub struct LogWatcher {
    api: Arc<dyn HeadlessLogApi>,
    client: StreamClient,
    options: WatcherOptions,
}

impl LogWatcher {
    pub fn new(api: Arc<dyn HeadlessLogApi>, client: StreamClient, options: WatcherOptions) -> Self {
        Self {
            api,
            client,
            options,
        }
    }

    /// Start watching an instance. Must be called inside a Tokio runtime.
    pub fn watch(&self, instance_id: impl Into<String>, consumer: impl LogConsumer) -> WatchHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let watcher = self.clone();
        let instance_id = instance_id.into();
        let task = tokio::spawn(async move { watcher.run(instance_id, consumer, cancel_rx).await });

        WatchHandle {
            disposer: Disposer {
                tx: Arc::new(cancel_tx),
            },
            task: Some(task),
        }
    }

    async fn run(
        self,
        instance_id: String,
        mut consumer: impl LogConsumer,
        mut cancel: watch::Receiver<bool>,
    ) -> WatchSummary {
        let mut summary = WatchSummary::new();
        let mut position = StreamPosition::default();
        debug!(instance_id = %instance_id, "watching headless logs");

        loop {
            if self.check_done(&instance_id, &mut cancel, &mut summary).await {
                break;
            }

            summary.attempts += 1;
            match self
                .attempt(&instance_id, &mut consumer, &mut cancel, &mut position, &mut summary)
                .await
            {
                AttemptEnd::Disposed => break,
                AttemptEnd::ProducerError { msg, status_code } => {
                    warn!(instance_id = %instance_id, status_code, msg = %msg, "producer reported an error");
                }
                end => debug!(instance_id = %instance_id, reason = ?end, "log stream attempt ended"),
            }

            if self.check_done(&instance_id, &mut cancel, &mut summary).await {
                break;
            }

            debug!(instance_id = %instance_id, delay = ?self.options.retry_delay, "re-trying headless logs");
            summary.retries += 1;
            if until_disposed(&mut cancel, tokio::time::sleep(self.options.retry_delay))
                .await
                .is_none()
            {
                break;
            }
        }

        info!(
            instance_id = %instance_id,
            outcome = ?summary.outcome,
            attempts = summary.attempts,
            delivered_bytes = summary.delivered_bytes,
            "stopped watching headless logs"
        );
        summary
    }

    /// Returns true when the watch should stop, recording why.
    async fn check_done(
        &self,
        instance_id: &str,
        cancel: &mut watch::Receiver<bool>,
        summary: &mut WatchSummary,
    ) -> bool {
        match until_disposed(cancel, self.api.is_done(instance_id)).await {
            None => {
                summary.outcome = WatchOutcome::Disposed;
                true
            }
            Some(Ok(true)) => {
                summary.outcome = WatchOutcome::Done;
                true
            }
            Some(Ok(false)) => false,
            Some(Err(err)) => {
                debug!(instance_id, error = %err, "is-done check failed, assuming still running");
                false
            }
        }
    }

    async fn attempt(
        &self,
        instance_id: &str,
        consumer: &mut impl LogConsumer,
        cancel: &mut watch::Receiver<bool>,
        position: &mut StreamPosition,
        summary: &mut WatchSummary,
    ) -> AttemptEnd {
        let urls = match until_disposed(cancel, self.api.headless_log_urls(instance_id)).await {
            None => return AttemptEnd::Disposed,
            Some(Ok(urls)) => urls,
            Some(Err(err)) => return AttemptEnd::Unavailable(err.to_string()),
        };
        // Only the first stream is followed.
        let Some((terminal_id, url)) = urls.first_stream() else {
            return AttemptEnd::NoStreams;
        };

        let cursor = position.enter(terminal_id).filter(|_| self.options.resume);
        debug!(instance_id, terminal_id, url, cursor, "fetching log stream");
        let mut response = match until_disposed(cancel, self.client.open(url, cursor)).await {
            None => return AttemptEnd::Disposed,
            Some(Ok(response)) => response,
            Some(Err(err)) => return AttemptEnd::Unavailable(err.to_string()),
        };

        let format = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(WireFormat::from_content_type)
            .unwrap_or(WireFormat::Json);
        let mut decoder = StreamDecoder::new(format);

        loop {
            let next = match until_disposed(cancel, response.chunk()).await {
                // Dropping the response cancels the read.
                None => return AttemptEnd::Disposed,
                Some(next) => next,
            };
            let messages = match next {
                Ok(Some(bytes)) => decoder.push(&bytes),
                Ok(None) => {
                    let tail = decoder.finish();
                    if let Some(end) = deliver(tail, consumer, cancel, position, summary) {
                        return end;
                    }
                    return AttemptEnd::Ended;
                }
                Err(err) => return AttemptEnd::Unavailable(err.to_string()),
            };
            if let Some(end) = deliver(messages, consumer, cancel, position, summary) {
                return end;
            }
        }
    }
}

/// Hand messages to the consumer. Returns the attempt end if one of them
/// terminates the attempt.
fn deliver(
    messages: Vec<StreamMessage>,
    consumer: &mut impl LogConsumer,
    cancel: &watch::Receiver<bool>,
    position: &mut StreamPosition,
    summary: &mut WatchSummary,
) -> Option<AttemptEnd> {
    for message in messages {
        if *cancel.borrow() {
            return Some(AttemptEnd::Disposed);
        }
        match message {
            StreamMessage::Chunk { chunk } => {
                let len = chunk.len() as u64;
                summary.chunks += 1;
                summary.delivered_bytes += len;
                position.bytes += len;
                consumer.on_chunk(chunk);
            }
            StreamMessage::Error { msg, status_code } => {
                consumer.on_producer_error(&msg, status_code);
                return Some(AttemptEnd::ProducerError { msg, status_code });
            }
        }
    }
    None
}

/// Run `fut` unless the watch is disposed first.
async fn until_disposed<F: Future>(cancel: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        // A dropped sender also ends the watch.
        _ = cancel.wait_for(|disposed| *disposed) => None,
        output = fut => Some(output),
    }
}

/// Cloneable, thread-safe dispose trigger.
#[derive(Debug, Clone)]
pub struct Disposer {
    tx: Arc<watch::Sender<bool>>,
}

impl Disposer {
    /// Cancel the in-flight read and suppress further retries. Idempotent.
    pub fn dispose(&self) {
        self.tx.send_replace(true);
    }
}

/// Handle to a running watch. Dropping it disposes the watch.
pub struct WatchHandle {
    disposer: Disposer,
    task: Option<JoinHandle<WatchSummary>>,
}

impl WatchHandle {
    /// Dispose the watch. Safe to call any number of times.
    pub fn dispose(&self) {
        self.disposer.dispose();
    }

    /// A trigger usable from other threads, e.g. a signal handler.
    pub fn disposer(&self) -> Disposer {
        self.disposer.clone()
    }

    /// Wait for the watch to stop.
    pub async fn finished(mut self) -> Result<WatchSummary, WatchError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|err| WatchError::Task(err.to_string())),
            None => Err(WatchError::Task("watch already awaited".to_string())),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.disposer.dispose();
    }
}
