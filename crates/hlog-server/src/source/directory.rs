//! Directory-backed log source.
//!
//! Terminal output is read from `<root>/<instance_id>/<terminal_id>.log`.
//! The file is followed while the instance is running and drained once it
//! has stopped.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hlog_protocol::TextDecoder;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use super::{ChunkHandler, DeliveryError, LogSource, LogSourceError};
use crate::session::AbortSignal;
use crate::store::{WorkspaceInstance, WorkspaceStore};

/// Extension of terminal log files.
pub const LOG_FILE_EXTENSION: &str = "log";

/// Default delay between polls of a growing log file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default size of a single file read.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 16 * 1024;

/// Reads terminal logs from a directory tree.
pub struct DirectoryLogSource {
    root: PathBuf,
    store: Arc<dyn WorkspaceStore>,
    poll_interval: Duration,
    read_chunk_bytes: usize,
}

impl DirectoryLogSource {
    /// Create a source rooted at `root`, consulting `store` for the
    /// instance phase when the end of a file is reached.
    pub fn new(root: impl Into<PathBuf>, store: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            root: root.into(),
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
        }
    }

    /// Override the follow poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the read size. Zero is treated as one byte.
    pub fn with_read_chunk_bytes(mut self, read_chunk_bytes: usize) -> Self {
        self.read_chunk_bytes = read_chunk_bytes.max(1);
        self
    }

    /// Path of one terminal's log file, if both ids are safe path segments.
    pub fn log_path(&self, instance_id: &str, terminal_id: &str) -> Option<PathBuf> {
        if !is_safe_segment(instance_id) || !is_safe_segment(terminal_id) {
            return None;
        }
        Some(
            self.root
                .join(instance_id)
                .join(format!("{}.{}", terminal_id, LOG_FILE_EXTENSION)),
        )
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// Deliver text, translating a consumer abort into a quiet stop.
async fn deliver(on_chunk: &dyn ChunkHandler, text: String) -> Result<bool, LogSourceError> {
    if text.is_empty() {
        return Ok(true);
    }
    match on_chunk.on_chunk(text).await {
        Ok(()) => Ok(true),
        Err(DeliveryError::Aborted) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl LogSource for DirectoryLogSource {
    async fn terminals(&self, instance: &WorkspaceInstance) -> Result<Vec<String>, LogSourceError> {
        if !is_safe_segment(&instance.id) {
            return Ok(Vec::new());
        }
        let dir = self.root.join(&instance.id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut terminals = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                terminals.push(stem.to_string());
            }
        }
        terminals.sort();
        Ok(terminals)
    }

    async fn stream_log(
        &self,
        instance: &WorkspaceInstance,
        terminal_id: &str,
        on_chunk: &dyn ChunkHandler,
        mut aborted: AbortSignal,
    ) -> Result<(), LogSourceError> {
        let not_found = || LogSourceError::TerminalNotFound {
            instance_id: instance.id.clone(),
            terminal_id: terminal_id.to_string(),
        };
        let path = self.log_path(&instance.id, terminal_id).ok_or_else(not_found)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(err.into()),
        };

        let mut decoder = TextDecoder::new();
        let mut buf = vec![0u8; self.read_chunk_bytes];
        // Set once the instance is seen stopped; the next EOF ends the stream.
        let mut draining = false;

        loop {
            if aborted.is_aborted() {
                debug!(instance_id = %instance.id, terminal_id, "log source observed abort");
                return Ok(());
            }

            let read = file.read(&mut buf).await?;
            if read > 0 {
                trace!(instance_id = %instance.id, terminal_id, bytes = read, "read log bytes");
                if !deliver(on_chunk, decoder.push(&buf[..read])).await? {
                    return Ok(());
                }
                continue;
            }

            if draining {
                deliver(on_chunk, decoder.finish()).await?;
                return Ok(());
            }

            match self.store.find_instance_by_id(&instance.id).await? {
                None => return Err(LogSourceError::InstanceGone(instance.id.clone())),
                Some(current) if current.phase.is_stopped() => {
                    // Output written between the last read and the stop is
                    // still picked up by one more pass.
                    draining = true;
                }
                Some(_) => {
                    tokio::select! {
                        _ = aborted.aborted() => {
                            debug!(instance_id = %instance.id, terminal_id, "log source observed abort while following");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorkspaceStore;
    use crate::session::abort_pair;
    use crate::store::{InstancePhase, Workspace, WorkspaceKind};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Collect {
        chunks: Mutex<Vec<String>>,
    }

    impl Collect {
        fn joined(&self) -> String {
            self.chunks.lock().unwrap().concat()
        }
    }

    #[async_trait]
    impl ChunkHandler for Collect {
        async fn on_chunk(&self, chunk: String) -> Result<(), DeliveryError> {
            self.chunks.lock().unwrap().push(chunk);
            Ok(())
        }
    }

    fn setup(phase: InstancePhase) -> (TempDir, MemoryWorkspaceStore, WorkspaceInstance) {
        let dir = TempDir::new().unwrap();
        let store = MemoryWorkspaceStore::new();
        store.insert_workspace(Workspace {
            id: "ws-1".to_string(),
            owner_id: "u-1".to_string(),
            kind: WorkspaceKind::Prebuild,
            context_url: String::new(),
        });
        let instance = WorkspaceInstance {
            id: "inst-1".to_string(),
            workspace_id: "ws-1".to_string(),
            phase,
        };
        store.insert_instance(instance.clone());
        std::fs::create_dir_all(dir.path().join("inst-1")).unwrap();
        (dir, store, instance)
    }

    fn source(dir: &TempDir, store: &MemoryWorkspaceStore) -> DirectoryLogSource {
        DirectoryLogSource::new(dir.path(), Arc::new(store.clone()))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_stopped_instance_streams_whole_file() {
        let (dir, store, instance) = setup(InstancePhase::Stopped);
        let content = "h\u{e9}llo w\u{f6}rld \u{1f600}\n".repeat(20);
        std::fs::write(dir.path().join("inst-1/0.log"), &content).unwrap();

        let source = source(&dir, &store).with_read_chunk_bytes(3);
        let sink = Collect::default();
        let (_handle, signal) = abort_pair();

        source.stream_log(&instance, "0", &sink, signal).await.unwrap();

        assert_eq!(sink.joined(), content);
        assert!(sink.chunks.lock().unwrap().len() > 1);
    }

    #[tokio::test]
    async fn test_follows_running_instance_until_stopped() {
        let (dir, store, instance) = setup(InstancePhase::Running);
        let path = dir.path().join("inst-1/0.log");
        std::fs::write(&path, "first\n").unwrap();

        let writer_store = store.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .unwrap();
            file.write_all(b"second\n").await.unwrap();
            file.flush().await.unwrap();
            writer_store.set_phase("inst-1", InstancePhase::Stopped);
        });

        let source = source(&dir, &store);
        let sink = Collect::default();
        let (_handle, signal) = abort_pair();

        tokio::time::timeout(
            Duration::from_secs(5),
            source.stream_log(&instance, "0", &sink, signal),
        )
        .await
        .expect("stream should end after stop")
        .unwrap();
        writer.await.unwrap();

        assert_eq!(sink.joined(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_abort_while_following() {
        let (dir, store, instance) = setup(InstancePhase::Running);
        std::fs::write(dir.path().join("inst-1/0.log"), "x").unwrap();

        let source = source(&dir, &store);
        let sink = Collect::default();
        let (handle, signal) = abort_pair();

        let abort = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.abort();
        });

        tokio::time::timeout(
            Duration::from_secs(2),
            source.stream_log(&instance, "0", &sink, signal),
        )
        .await
        .expect("abort should end the stream promptly")
        .unwrap();
        abort.await.unwrap();

        assert_eq!(sink.joined(), "x");
    }

    #[tokio::test]
    async fn test_instance_disappearing_fails() {
        let (dir, store, instance) = setup(InstancePhase::Running);
        std::fs::write(dir.path().join("inst-1/0.log"), "x").unwrap();
        store.remove_instance("inst-1");

        let source = source(&dir, &store);
        let (_handle, signal) = abort_pair();
        let result = source
            .stream_log(&instance, "0", &Collect::default(), signal)
            .await;

        assert!(matches!(result, Err(LogSourceError::InstanceGone(id)) if id == "inst-1"));
    }

    #[tokio::test]
    async fn test_missing_or_unsafe_terminal() {
        let (dir, store, instance) = setup(InstancePhase::Stopped);
        let source = source(&dir, &store);

        for terminal in ["missing", "../escape", "", ".."] {
            let (_handle, signal) = abort_pair();
            let result = source
                .stream_log(&instance, terminal, &Collect::default(), signal)
                .await;
            assert!(
                matches!(result, Err(LogSourceError::TerminalNotFound { .. })),
                "terminal {:?}",
                terminal
            );
        }
    }

    #[tokio::test]
    async fn test_terminals_sorted_log_files_only() {
        let (dir, store, instance) = setup(InstancePhase::Running);
        for name in ["2.log", "0.log", "notes.txt", "1.log"] {
            std::fs::write(dir.path().join("inst-1").join(name), "").unwrap();
        }

        let source = source(&dir, &store);
        assert_eq!(source.terminals(&instance).await.unwrap(), vec!["0", "1", "2"]);

        let other = WorkspaceInstance {
            id: "inst-unknown".to_string(),
            workspace_id: "ws-1".to_string(),
            phase: InstancePhase::Running,
        };
        assert!(source.terminals(&other).await.unwrap().is_empty());
    }
}
