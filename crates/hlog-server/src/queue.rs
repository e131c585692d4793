//! Backpressure write queue.
//!
//! Serializes writes to a slow sink and hands completion back to the
//! caller. At most one task executes at a time and tasks run in submission
//! order. The future returned by [`WriteQueue::enqueue`] resolves only once
//! that task has finished, so a producer that awaits each enqueue cannot
//! outrun the sink.
//!
//! A failing task does not stop the queue; its error is delivered to its
//! own caller only. The queue never retries.

use std::future::Future;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

type Task<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), E>> + Send>;

struct Job<E> {
    task: Task<E>,
    done: oneshot::Sender<Result<(), E>>,
}

/// Error returned to the caller of [`WriteQueue::enqueue`].
#[derive(Debug, thiserror::Error)]
pub enum QueueError<E> {
    /// The task itself failed.
    #[error("{0}")]
    Task(E),

    /// The queue stopped before the task could run.
    #[error("write queue closed")]
    Closed,
}

/// Strictly ordered, single-in-flight task queue.
///
/// Must be created inside a Tokio runtime; the drain loop runs as its own
/// task and exits once the queue is dropped and every pending task ran.
pub struct WriteQueue<E> {
    tx: mpsc::UnboundedSender<Job<E>>,
}

impl<E: Send + 'static> WriteQueue<E> {
    /// Create a queue and start its drain loop.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<E>>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = (job.task)().await;
                // The caller may have stopped waiting; the next task still runs.
                let _ = job.done.send(result);
            }
        });

        Self { tx }
    }

    /// Submit a task.
    ///
    /// The task is queued immediately, at call time, not when the returned
    /// future is first polled. The future resolves when this task settles.
    pub fn enqueue<F, Fut>(&self, task: F) -> impl Future<Output = Result<(), QueueError<E>>> + Send
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let (done, completion) = oneshot::channel();
        let job = Job {
            task: Box::new(move || -> BoxFuture<'static, Result<(), E>> { Box::pin(task()) }),
            done,
        };
        let submitted = self.tx.send(job).is_ok();

        async move {
            if !submitted {
                return Err(QueueError::Closed);
            }
            match completion.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(QueueError::Task(err)),
                Err(_) => Err(QueueError::Closed),
            }
        }
    }
}

impl<E: Send + 'static> Default for WriteQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}
