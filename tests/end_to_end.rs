//! End-to-End Tests
//!
//! Run the real watcher against the real log server router on a loopback
//! port, with in-memory collaborators behind the router.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use headless_logs::{
    HeadlessLogApi, HttpLogApi, LogWatcher, StreamClient, WatchOutcome, WatcherOptions,
};
use hlog_server::{
    router, AppState, BearerTokenAuthenticator, DefaultGuardFactory, InstancePhase,
    MemoryWorkspaceStore, Principal, ScriptStep, ScriptedLogSource, StaticRepositoryAccess,
    StreamController, User, Workspace, WorkspaceInstance, WorkspaceKind,
};

const TOKEN: &str = "owner-token";

struct Server {
    addr: SocketAddr,
    store: MemoryWorkspaceStore,
    source: ScriptedLogSource,
}

async fn start(source: ScriptedLogSource) -> Server {
    let store = MemoryWorkspaceStore::new();
    store.insert_workspace(Workspace {
        id: "ws-1".to_string(),
        owner_id: "owner".to_string(),
        kind: WorkspaceKind::Regular,
        context_url: String::new(),
    });
    store.insert_instance(WorkspaceInstance {
        id: "inst-1".to_string(),
        workspace_id: "ws-1".to_string(),
        phase: InstancePhase::Running,
    });

    let auth = BearerTokenAuthenticator::new().with_token(
        TOKEN,
        Principal::User(User {
            id: "owner".to_string(),
            name: "Owner".to_string(),
            blocked: false,
        }),
    );
    let controller = StreamController::new(
        Arc::new(store.clone()),
        Arc::new(source.clone()),
        Arc::new(DefaultGuardFactory::new(Arc::new(StaticRepositoryAccess::new()))),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState {
        controller: Arc::new(controller),
        auth: Arc::new(auth),
        public_url: format!("http://{}", addr),
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Server {
        addr,
        store,
        source,
    }
}

fn watcher(server: &Server, resume: bool) -> LogWatcher {
    let http = reqwest::Client::new();
    let base = format!("http://{}", server.addr);
    LogWatcher::new(
        Arc::new(HttpLogApi::new(http.clone(), base, Some(TOKEN.to_string()))),
        StreamClient::new(http, Some(TOKEN.to_string())),
        WatcherOptions {
            retry_delay: Duration::from_millis(30),
            resume,
        },
    )
}

fn collector() -> (Arc<Mutex<String>>, impl FnMut(String) + Send + 'static) {
    let text = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&text);
    (text, move |chunk: String| sink.lock().unwrap().push_str(&chunk))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_watch_until_instance_stops_without_duplicates() {
    let server = start(ScriptedLogSource::chunks(["a", "b", "c"])).await;
    let (text, consumer) = collector();

    let handle = watcher(&server, true).watch("inst-1", consumer);

    // The stream ends while the instance is still running, so the watcher
    // keeps reconnecting with a cursor past what it already has.
    wait_for(|| server.source.chunks_emitted() >= 6).await;
    assert_eq!(*text.lock().unwrap(), "abc");

    server.store.set_phase("inst-1", InstancePhase::Stopped);
    let summary = tokio::time::timeout(Duration::from_secs(5), handle.finished())
        .await
        .expect("watch should finish once stopped")
        .unwrap();

    assert_eq!(summary.outcome, WatchOutcome::Done);
    assert!(summary.retries >= 1);
    assert_eq!(summary.delivered_bytes, 3);
    assert_eq!(*text.lock().unwrap(), "abc");
}

#[tokio::test]
async fn test_without_resume_reconnect_replays() {
    let server = start(ScriptedLogSource::chunks(["x"])).await;
    let (text, consumer) = collector();

    let handle = watcher(&server, false).watch("inst-1", consumer);
    wait_for(|| text.lock().unwrap().len() >= 2).await;
    handle.dispose();

    assert!(text.lock().unwrap().chars().all(|c| c == 'x'));
}

#[tokio::test]
async fn test_dispose_aborts_server_session() {
    let source = ScriptedLogSource::new(vec![
        ScriptStep::Chunk("first".to_string()),
        ScriptStep::WaitForAbort,
    ]);
    let server = start(source).await;
    let (text, consumer) = collector();

    let handle = watcher(&server, true).watch("inst-1", consumer);
    wait_for(|| text.lock().unwrap().as_str() == "first").await;

    handle.dispose();
    let summary = handle.finished().await.unwrap();
    assert_eq!(summary.outcome, WatchOutcome::Disposed);

    wait_for(|| server.source.abort_count() == 1).await;
    assert_eq!(*text.lock().unwrap(), "first");
}

#[tokio::test]
async fn test_stopped_instance_is_done_immediately() {
    let server = start(ScriptedLogSource::chunks(["never"])).await;
    server.store.set_phase("inst-1", InstancePhase::Stopped);

    let api = HttpLogApi::new(
        reqwest::Client::new(),
        format!("http://{}", server.addr),
        Some(TOKEN.to_string()),
    );
    assert!(api.is_done("inst-1").await.unwrap());

    let (text, consumer) = collector();
    let summary = watcher(&server, true).watch("inst-1", consumer).finished().await.unwrap();

    assert_eq!(summary.outcome, WatchOutcome::Done);
    assert_eq!(summary.attempts, 0);
    assert!(text.lock().unwrap().is_empty());
    assert_eq!(server.source.chunks_emitted(), 0);
}
