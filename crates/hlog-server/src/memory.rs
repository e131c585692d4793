//! In-memory collaborators for testing.
//!
//! Provides an entity store, a scripted log source and a recording response
//! sink. Used by unit tests and by integration tests in dependent crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hlog_protocol::StreamMessage;

use crate::body::{ResponseSink, SinkError};
use crate::session::AbortSignal;
use crate::source::{ChunkHandler, DeliveryError, LogSource, LogSourceError};
use crate::store::{InstancePhase, StoreError, Workspace, WorkspaceInstance, WorkspaceStore};

// ============================================================================
// Entity store
// ============================================================================

/// Thread-safe in-memory entity store.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkspaceStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    workspaces: HashMap<String, Workspace>,
    /// Instances in insertion order; the last one per workspace is current.
    instances: Vec<WorkspaceInstance>,
    unavailable: bool,
}

impl MemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.workspaces.insert(workspace.id.clone(), workspace);
    }

    /// Insert or replace an instance. Replacing keeps its position.
    pub fn insert_instance(&self, instance: WorkspaceInstance) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.instances.iter_mut().find(|i| i.id == instance.id) {
            Some(existing) => *existing = instance,
            None => inner.instances.push(instance),
        }
    }

    /// Change an instance's phase. Returns false if it does not exist.
    pub fn set_phase(&self, instance_id: &str, phase: InstancePhase) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.instances.iter_mut().find(|i| i.id == instance_id) {
            Some(instance) => {
                instance.phase = phase;
                true
            }
            None => false,
        }
    }

    pub fn remove_instance(&self, instance_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.instances.retain(|i| i.id != instance_id);
    }

    /// Make every lookup fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    fn read<T>(&self, f: impl FnOnce(&StoreInner) -> Option<T>) -> Result<Option<T>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(f(&inner))
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn find_by_instance_id(&self, instance_id: &str) -> Result<Option<Workspace>, StoreError> {
        self.read(|inner| {
            let instance = inner.instances.iter().find(|i| i.id == instance_id)?;
            inner.workspaces.get(&instance.workspace_id).cloned()
        })
    }

    async fn find_instance_by_id(&self, instance_id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        self.read(|inner| inner.instances.iter().find(|i| i.id == instance_id).cloned())
    }

    async fn find_by_id(&self, workspace_id: &str) -> Result<Option<Workspace>, StoreError> {
        self.read(|inner| inner.workspaces.get(workspace_id).cloned())
    }

    async fn find_current_instance(&self, workspace_id: &str) -> Result<Option<WorkspaceInstance>, StoreError> {
        self.read(|inner| {
            inner
                .instances
                .iter()
                .rev()
                .find(|i| i.workspace_id == workspace_id)
                .cloned()
        })
    }
}

// ============================================================================
// Scripted log source
// ============================================================================

/// One step of a scripted producer.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a chunk and wait for it to be written.
    Chunk(String),
    /// Fail the stream.
    Fail(String),
    /// Pause, waking early on abort.
    Sleep(Duration),
    /// Block until the session is aborted.
    WaitForAbort,
}

/// Log source that replays a fixed script for every terminal.
#[derive(Debug, Clone)]
pub struct ScriptedLogSource {
    script: Vec<ScriptStep>,
    terminals: Vec<String>,
    emitted: Arc<AtomicUsize>,
    aborts: Arc<AtomicUsize>,
}

impl ScriptedLogSource {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            terminals: vec!["0".to_string()],
            emitted: Arc::new(AtomicUsize::new(0)),
            aborts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Emit `chunks` then end cleanly.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(chunks.into_iter().map(|c| ScriptStep::Chunk(c.into())).collect())
    }

    pub fn with_terminals<I, S>(mut self, terminals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminals = terminals.into_iter().map(Into::into).collect();
        self
    }

    /// Chunks accepted by the handler so far, across all streams.
    pub fn chunks_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Streams that stopped because of an abort.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogSource for ScriptedLogSource {
    async fn terminals(&self, _instance: &WorkspaceInstance) -> Result<Vec<String>, LogSourceError> {
        Ok(self.terminals.clone())
    }

    async fn stream_log(
        &self,
        _instance: &WorkspaceInstance,
        _terminal_id: &str,
        on_chunk: &dyn ChunkHandler,
        mut aborted: AbortSignal,
    ) -> Result<(), LogSourceError> {
        for step in &self.script {
            if aborted.is_aborted() {
                self.record_abort();
                return Ok(());
            }
            match step {
                ScriptStep::Chunk(text) => match on_chunk.on_chunk(text.clone()).await {
                    Ok(()) => {
                        self.emitted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(DeliveryError::Aborted) => {
                        self.record_abort();
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                },
                ScriptStep::Fail(reason) => return Err(LogSourceError::Producer(reason.clone())),
                ScriptStep::Sleep(duration) => {
                    tokio::select! {
                        _ = aborted.aborted() => {}
                        _ = tokio::time::sleep(*duration) => {}
                    }
                }
                ScriptStep::WaitForAbort => {
                    aborted.aborted().await;
                    self.record_abort();
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Recording sink
// ============================================================================

/// What happened to a recorded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Write(Bytes),
    End,
    Fail(Option<Bytes>),
}

/// Response sink that records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    write_delay: Option<Duration>,
    fail_write_at: Option<usize>,
    close_write_at: Option<usize>,
    writes: Arc<AtomicUsize>,
    in_flight: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each write take `delay`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Fail the write with this zero-based index.
    pub fn failing_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    /// Report the peer gone from the write with this zero-based index on.
    pub fn closed_at(mut self, index: usize) -> Self {
        self.close_write_at = Some(index);
        self
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decoded JSON frames of successful writes and the failure trailer.
    pub fn frames(&self) -> Vec<StreamMessage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Write(bytes) | SinkEvent::Fail(Some(bytes)) => {
                    serde_json::from_slice(&bytes).ok()
                }
                _ => None,
            })
            .collect()
    }

    /// Concatenated raw text of successful writes.
    pub fn text(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Write(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                _ => None,
            })
            .collect()
    }

    /// Whether two writes were ever in progress at once.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    fn push(&self, event: SinkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn write(&self, bytes: Bytes) -> Result<(), SinkError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail_write_at == Some(index) {
            Err(SinkError::Failed(format!("write {} rejected", index)))
        } else if self.close_write_at.is_some_and(|closed| index >= closed) {
            Err(SinkError::Closed)
        } else {
            self.push(SinkEvent::Write(bytes));
            Ok(())
        };
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn fail(&self, trailer: Option<Bytes>) {
        self.push(SinkEvent::Fail(trailer));
    }

    async fn end(&self) {
        self.push(SinkEvent::End);
    }
}
