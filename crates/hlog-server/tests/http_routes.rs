//! HTTP Route Tests
//!
//! Bind the real router on a loopback port and talk to it over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use hlog_protocol::{FrameDecoder, HeadlessLogUrls, StreamMessage};
use hlog_server::{
    router, AppState, BearerTokenAuthenticator, DefaultGuardFactory, InstancePhase,
    MemoryWorkspaceStore, Principal, ScriptStep, ScriptedLogSource, StaticRepositoryAccess,
    StreamController, User, Workspace, WorkspaceInstance, WorkspaceKind,
};

struct Harness {
    addr: SocketAddr,
    source: ScriptedLogSource,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.unwrap()
    }

    /// Trigger graceful shutdown as the binary does on Ctrl-C.
    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(source: ScriptedLogSource) -> Harness {
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

    let user = |id: &str| {
        Principal::User(User {
            id: id.to_string(),
            name: String::new(),
            blocked: false,
        })
    };
    let auth = BearerTokenAuthenticator::new()
        .with_token("owner-token", user("owner"))
        .with_token("stranger-token", user("stranger"));

    let controller = Arc::new(StreamController::new(
        Arc::new(store),
        Arc::new(source.clone()),
        Arc::new(DefaultGuardFactory::new(Arc::new(StaticRepositoryAccess::new()))),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState {
        controller: Arc::clone(&controller),
        auth: Arc::new(auth),
        public_url: format!("http://{}", addr),
    });
    let (shutdown, stop) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.await;
                controller.shutdown();
            })
            .await
            .unwrap();
    });

    Harness {
        addr,
        source,
        client: reqwest::Client::new(),
        shutdown: Some(shutdown),
        server,
    }
}

#[tokio::test]
async fn test_framed_stream_over_http() {
    let harness = start(ScriptedLogSource::chunks(["a", "b", "c"])).await;

    let response = harness.get("/headless-logs/inst-1/0", Some("owner-token")).await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/json; charset=utf-8"
    );
    assert_eq!(response.headers()["transfer-encoding"].to_str().unwrap(), "chunked");

    let body = response.bytes().await.unwrap();
    let mut decoder = FrameDecoder::new();
    assert_eq!(
        decoder.push(&body),
        vec![
            StreamMessage::chunk("a"),
            StreamMessage::chunk("b"),
            StreamMessage::chunk("c"),
        ]
    );
}

#[tokio::test]
async fn test_legacy_plain_text_stream() {
    let harness = start(ScriptedLogSource::chunks(["hello ", "world"])).await;

    let response = harness.get("/workspace-logs/ws-1/0", Some("owner-token")).await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_resume_cursor_query() {
    let harness = start(ScriptedLogSource::chunks(["hello ", "world"])).await;

    let response = harness
        .get("/workspace-logs/ws-1/0?cursor=6", Some("owner-token"))
        .await;
    assert_eq!(response.text().await.unwrap(), "world");
}

#[tokio::test]
async fn test_rejections_map_to_status_codes() {
    let harness = start(ScriptedLogSource::chunks(["a"])).await;

    let cases = [
        ("/headless-logs/inst-1/0", None, 401),
        ("/headless-logs/inst-1/0", Some("bogus"), 401),
        ("/headless-logs/inst-1/0", Some("stranger-token"), 403),
        ("/headless-logs/missing/0", Some("owner-token"), 404),
        ("/workspace-logs/missing/0", Some("owner-token"), 404),
        ("/headless-logs/inst-1", Some("stranger-token"), 403),
    ];
    for (path, token, status) in cases {
        let response = harness.get(path, token).await;
        assert_eq!(response.status().as_u16(), status, "GET {} with {:?}", path, token);
    }
    assert_eq!(harness.source.chunks_emitted(), 0);
}

#[tokio::test]
async fn test_log_urls_endpoint() {
    let harness = start(ScriptedLogSource::chunks(["a"]).with_terminals(["0"])).await;

    let response = harness.get("/headless-logs/inst-1", Some("owner-token")).await;
    assert_eq!(response.status().as_u16(), 200);
    let urls: HeadlessLogUrls = response.json().await.unwrap();
    assert!(urls.online);
    assert_eq!(
        urls.first_stream(),
        Some(("0", harness.url("/headless-logs/inst-1/0").as_str()))
    );
}

#[tokio::test]
async fn test_client_disconnect_aborts_source() {
    let source = ScriptedLogSource::new(vec![
        ScriptStep::Chunk("a".to_string()),
        ScriptStep::WaitForAbort,
    ]);
    let harness = start(source).await;

    let mut response = harness.get("/headless-logs/inst-1/0", Some("owner-token")).await;
    let first = response.chunk().await.unwrap().expect("first frame");
    assert!(!first.is_empty());
    drop(response);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.source.abort_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "source was never aborted");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_graceful_shutdown_ends_live_streams() {
    let source = ScriptedLogSource::new(vec![
        ScriptStep::Chunk("first".to_string()),
        ScriptStep::WaitForAbort,
    ]);
    let mut harness = start(source).await;

    let mut response = harness.get("/headless-logs/inst-1/0", Some("owner-token")).await;
    let first = response.chunk().await.unwrap().expect("first frame");
    let mut decoder = FrameDecoder::new();
    assert_eq!(decoder.push(&first), vec![StreamMessage::chunk("first")]);

    harness.stop();

    // The body ends without a trailer once the session is aborted.
    let rest = tokio::time::timeout(Duration::from_secs(3), response.bytes())
        .await
        .expect("stream should end on shutdown")
        .unwrap();
    assert!(decoder.push(&rest).is_empty());

    tokio::time::timeout(Duration::from_secs(3), &mut harness.server)
        .await
        .expect("server should stop while a client is following")
        .unwrap();
    assert_eq!(harness.source.abort_count(), 1);
}
