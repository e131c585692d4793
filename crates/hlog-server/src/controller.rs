//! Stream controller.
//!
//! Drives one request through authorization, resolution and the access
//! check, then pumps log chunks from the source through a per-session
//! [`WriteQueue`] into the response:
//!
//! ```text
//! RECEIVED -> AUTHORIZING -> {FORBIDDEN, RESOLVING}
//! RESOLVING -> {NOT_FOUND, STREAMING}
//! STREAMING -> {COMPLETED, ABORTED, FAILED}
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use hlog_protocol::{HeadlessLogUrls, WireFormat, HEADLESS_LOG_ROUTE, STREAM_ERROR_MESSAGE};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::{Principal, HEADLESS_LOGS_SCOPE};
use crate::body::{ResponseSink, SinkError};
use crate::guard::{GuardFactory, GuardedResource, ResourceAccessOp};
use crate::queue::{QueueError, WriteQueue};
use crate::session::{AbortHandle, AbortSignal, SessionOutcome, StreamSession};
use crate::source::{ChunkHandler, DeliveryError, LogSource, LogSourceError};
use crate::store::{StoreError, Workspace, WorkspaceInstance, WorkspaceStore};

/// Errors that end a request before streaming starts.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("request is not authenticated")]
    Unauthenticated,

    #[error("user '{0}' is blocked")]
    Blocked(String),

    #[error("function principal lacks the '{0}' scope")]
    MissingScope(&'static str),

    #[error("access to logs of workspace '{0}' denied")]
    Forbidden(String),

    #[error("workspace not found for '{0}'")]
    WorkspaceNotFound(String),

    #[error("instance not found for '{0}'")]
    InstanceNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] LogSourceError),
}

impl ControllerError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControllerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ControllerError::Blocked(_)
            | ControllerError::MissingScope(_)
            | ControllerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ControllerError::WorkspaceNotFound(_) | ControllerError::InstanceNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ControllerError::Store(_) | ControllerError::Source(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

/// How the target instance is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// By instance id.
    Instance(String),
    /// By workspace id; streams its current instance.
    Workspace(String),
}

impl StreamTarget {
    fn id(&self) -> &str {
        match self {
            StreamTarget::Instance(id) | StreamTarget::Workspace(id) => id,
        }
    }
}

/// A request that passed authorization and resolution.
#[derive(Debug)]
pub struct PreparedStream {
    pub session: StreamSession,
    /// Caller id for log context.
    pub user_id: String,
    pub workspace: Workspace,
    pub instance: WorkspaceInstance,
    pub format: WireFormat,
}

/// Server-side stream controller.
pub struct StreamController {
    store: Arc<dyn WorkspaceStore>,
    source: Arc<dyn LogSource>,
    guards: Arc<dyn GuardFactory>,
    /// Set once on server shutdown; every live session subscribes.
    shutdown: watch::Sender<bool>,
}

impl StreamController {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        source: Arc<dyn LogSource>,
        guards: Arc<dyn GuardFactory>,
    ) -> Self {
        Self {
            store,
            source,
            guards,
            shutdown: watch::channel(false).0,
        }
    }

    /// Abort every live session and any started afterwards.
    ///
    /// Returns the number of sessions that were streaming.
    pub fn shutdown(&self) -> usize {
        let live = self.shutdown.receiver_count();
        self.shutdown.send_replace(true);
        info!(live_sessions = live, "aborting log streams for shutdown");
        live
    }

    /// Authorize, resolve and access-check a stream request.
    pub async fn prepare(
        &self,
        principal: Option<&Principal>,
        target: StreamTarget,
        terminal_id: &str,
        cursor: Option<u64>,
        format: WireFormat,
    ) -> Result<PreparedStream, ControllerError> {
        let result = self.admit(principal, &target).await;
        let (workspace, instance) = match result {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(
                    target_id = target.id(),
                    terminal_id,
                    status = err.status_code().as_u16(),
                    error = %err,
                    "log stream request rejected"
                );
                return Err(err);
            }
        };

        let session = StreamSession::new(instance.id.clone(), terminal_id, cursor);
        let user_id = principal.map_or("", Principal::log_id).to_string();
        debug!(
            session_id = %session.id,
            user_id = %user_id,
            instance_id = %instance.id,
            workspace_id = %workspace.id,
            terminal_id,
            cursor,
            "log stream admitted"
        );
        Ok(PreparedStream {
            session,
            user_id,
            workspace,
            instance,
            format,
        })
    }

    /// Stream endpoint metadata for an instance.
    ///
    /// `base_url` is prepended to every stream path.
    pub async fn log_urls(
        &self,
        principal: Option<&Principal>,
        instance_id: &str,
        base_url: &str,
    ) -> Result<HeadlessLogUrls, ControllerError> {
        let target = StreamTarget::Instance(instance_id.to_string());
        let (_, instance) = match self.admit(principal, &target).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(instance_id, status = err.status_code().as_u16(), error = %err, "log urls request rejected");
                return Err(err);
            }
        };

        let terminals = self.source.terminals(&instance).await.map_err(|err| {
            error!(instance_id, error = %err, "failed to list terminals");
            ControllerError::from(err)
        })?;
        let base = base_url.trim_end_matches('/');
        let streams = terminals
            .into_iter()
            .map(|terminal| {
                let url = format!("{}{}/{}/{}", base, HEADLESS_LOG_ROUTE, instance.id, terminal);
                (terminal, url)
            })
            .collect();

        Ok(HeadlessLogUrls {
            online: !instance.phase.is_stopped(),
            streams,
        })
    }

    async fn admit(
        &self,
        principal: Option<&Principal>,
        target: &StreamTarget,
    ) -> Result<(Workspace, WorkspaceInstance), ControllerError> {
        let principal = authorize(principal)?;
        let (workspace, instance) = self.resolve(target).await?;
        self.check_access(principal, &workspace).await?;
        Ok((workspace, instance))
    }

    /// Look up workspace and instance concurrently.
    async fn resolve(&self, target: &StreamTarget) -> Result<(Workspace, WorkspaceInstance), ControllerError> {
        let (workspace, instance) = match target {
            StreamTarget::Instance(id) => {
                tokio::join!(
                    self.store.find_by_instance_id(id),
                    self.store.find_instance_by_id(id)
                )
            }
            StreamTarget::Workspace(id) => {
                tokio::join!(
                    self.store.find_by_id(id),
                    self.store.find_current_instance(id)
                )
            }
        };

        let workspace = workspace?.ok_or_else(|| ControllerError::WorkspaceNotFound(target.id().to_string()))?;
        let instance = instance?.ok_or_else(|| ControllerError::InstanceNotFound(target.id().to_string()))?;
        Ok((workspace, instance))
    }

    async fn check_access(&self, principal: &Principal, workspace: &Workspace) -> Result<(), ControllerError> {
        let user = match principal {
            // Scope was checked during authorization.
            Principal::Function { .. } => return Ok(()),
            Principal::User(user) => user,
        };
        let guard = self.guards.for_user(user);
        let resource = GuardedResource::WorkspaceLog { subject: workspace };
        if guard.can_access(&resource, ResourceAccessOp::Get).await {
            Ok(())
        } else {
            Err(ControllerError::Forbidden(workspace.id.clone()))
        }
    }

    /// Pump the log into `sink` until the source ends, fails, or the
    /// consumer goes away.
    pub async fn stream<S: ResponseSink>(&self, prepared: PreparedStream, sink: S) -> SessionOutcome {
        let PreparedStream {
            session,
            user_id,
            workspace,
            instance,
            format,
        } = prepared;

        info!(
            session_id = %session.id,
            user_id = %user_id,
            workspace_id = %workspace.id,
            instance_id = %session.instance_id,
            terminal_id = %session.terminal_id,
            "log stream started"
        );

        let writer = QueuedWriter {
            queue: WriteQueue::new(),
            sink: sink.clone(),
            format,
            abort: session.abort_handle(),
            signal: session.signal(),
            skip: Mutex::new(CursorSkip::new(session.cursor.unwrap_or(0))),
        };
        let result = {
            let streaming = self
                .source
                .stream_log(&instance, &session.terminal_id, &writer, session.signal());
            tokio::pin!(streaming);
            let mut shutdown = self.shutdown.subscribe();
            tokio::select! {
                result = &mut streaming => result,
                _ = async { let _ = shutdown.wait_for(|stopping| *stopping).await; } => {
                    session.abort_handle().abort();
                    streaming.await
                }
            }
        };
        drop(writer);

        let elapsed_ms = (Utc::now() - session.started_at).num_milliseconds();
        let consumer_left = matches!(&result, Err(err) if err.is_aborted());
        if !session.finish() || consumer_left {
            debug!(
                session_id = %session.id,
                user_id = %user_id,
                workspace_id = %workspace.id,
                instance_id = %session.instance_id,
                elapsed_ms,
                "log stream aborted"
            );
            return SessionOutcome::Aborted;
        }

        match result {
            Ok(()) => {
                sink.end().await;
                info!(
                    session_id = %session.id,
                    user_id = %user_id,
                    workspace_id = %workspace.id,
                    instance_id = %session.instance_id,
                    terminal_id = %session.terminal_id,
                    elapsed_ms,
                    "log stream completed"
                );
                SessionOutcome::Completed
            }
            Err(err) => {
                error!(
                    session_id = %session.id,
                    user_id = %user_id,
                    workspace_id = %workspace.id,
                    instance_id = %session.instance_id,
                    terminal_id = %session.terminal_id,
                    error = %err,
                    "error streaming headless logs"
                );
                let trailer = match format.encode_error(STREAM_ERROR_MESSAGE, 500) {
                    Ok(frame) => frame.map(Bytes::from),
                    Err(encode_err) => {
                        error!(session_id = %session.id, error = %encode_err, "failed to encode error frame");
                        None
                    }
                };
                sink.fail(trailer).await;
                SessionOutcome::Failed
            }
        }
    }
}

fn authorize(principal: Option<&Principal>) -> Result<&Principal, ControllerError> {
    let principal = principal.ok_or(ControllerError::Unauthenticated)?;
    match principal {
        Principal::User(user) if user.blocked => Err(ControllerError::Blocked(user.id.clone())),
        Principal::Function { .. } if !principal.has_scope(HEADLESS_LOGS_SCOPE) => {
            Err(ControllerError::MissingScope(HEADLESS_LOGS_SCOPE))
        }
        _ => Ok(principal),
    }
}

/// Drops the first bytes of output a resuming consumer already has.
#[derive(Debug)]
struct CursorSkip {
    remaining: u64,
}

impl CursorSkip {
    fn new(cursor: u64) -> Self {
        Self { remaining: cursor }
    }

    /// The part of `chunk` past the cursor, starting on a char boundary.
    fn apply(&mut self, chunk: String) -> String {
        if self.remaining == 0 {
            return chunk;
        }
        let len = chunk.len() as u64;
        if self.remaining >= len {
            self.remaining -= len;
            return String::new();
        }
        let mut at = self.remaining as usize;
        while !chunk.is_char_boundary(at) {
            at += 1;
        }
        self.remaining = 0;
        chunk[at..].to_string()
    }
}

/// Chunk handler that encodes chunks and writes them through the queue.
struct QueuedWriter<S: ResponseSink> {
    queue: WriteQueue<SinkError>,
    sink: S,
    format: WireFormat,
    abort: AbortHandle,
    signal: AbortSignal,
    skip: Mutex<CursorSkip>,
}

#[async_trait]
impl<S: ResponseSink> ChunkHandler for QueuedWriter<S> {
    async fn on_chunk(&self, chunk: String) -> Result<(), DeliveryError> {
        if self.signal.is_aborted() {
            return Err(DeliveryError::Aborted);
        }

        let text = self
            .skip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(chunk);
        if text.is_empty() {
            return Ok(());
        }

        let frame = self
            .format
            .encode_chunk(&text)
            .map_err(|err| DeliveryError::Write(err.to_string()))?;
        let sink = self.sink.clone();
        let bytes = Bytes::from(frame);

        match self.queue.enqueue(move || async move { sink.write(bytes).await }).await {
            Ok(()) => Ok(()),
            Err(QueueError::Task(SinkError::Closed)) => {
                // The transport's disconnect watcher may not have run yet.
                self.abort.abort();
                Err(DeliveryError::Aborted)
            }
            Err(err) => Err(DeliveryError::Write(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_skip_across_chunks() {
        let mut skip = CursorSkip::new(5);
        assert_eq!(skip.apply("abc".to_string()), "");
        assert_eq!(skip.apply("defg".to_string()), "fg");
        assert_eq!(skip.apply("hij".to_string()), "hij");
    }

    #[test]
    fn test_cursor_skip_rounds_up_to_char_boundary() {
        // "\u{e9}" is two bytes; a cursor inside it skips the whole char.
        let mut skip = CursorSkip::new(2);
        assert_eq!(skip.apply("a\u{e9}b".to_string()), "b");
    }

    #[test]
    fn test_zero_cursor_passes_through() {
        let mut skip = CursorSkip::new(0);
        assert_eq!(skip.apply("abc".to_string()), "abc");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ControllerError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ControllerError::Blocked("u".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ControllerError::MissingScope(HEADLESS_LOGS_SCOPE).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ControllerError::Forbidden("w".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ControllerError::InstanceNotFound("i".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ControllerError::Store(StoreError::Unavailable("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
