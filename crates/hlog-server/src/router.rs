//! HTTP routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hlog_protocol::{WireFormat, HEADLESS_LOG_ROUTE, WORKSPACE_LOG_ROUTE};
use serde::Deserialize;
use tracing::{debug, error};

use crate::auth::Authenticator;
use crate::body;
use crate::controller::{ControllerError, StreamController, StreamTarget};

/// Shared state of the log routes.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<StreamController>,
    pub auth: Arc<dyn Authenticator>,
    /// Base URL used when publishing stream endpoints.
    pub public_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Bytes of output the client already has.
    pub cursor: Option<u64>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{}/:instance_id", HEADLESS_LOG_ROUTE), get(log_urls))
        .route(
            &format!("{}/:instance_id/:terminal_id", HEADLESS_LOG_ROUTE),
            get(headless_log),
        )
        .route(
            &format!("{}/:workspace_id/:terminal_id", WORKSPACE_LOG_ROUTE),
            get(workspace_log),
        )
        .with_state(state)
}

async fn log_urls(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ControllerError> {
    let principal = state.auth.authenticate(&headers).await;
    let urls = state
        .controller
        .log_urls(principal.as_ref(), &instance_id, &state.public_url)
        .await?;
    Ok(([(CACHE_CONTROL, "no-cache")], Json(urls)).into_response())
}

async fn headless_log(
    State(state): State<AppState>,
    Path((instance_id, terminal_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ControllerError> {
    open_stream(
        state,
        headers,
        StreamTarget::Instance(instance_id),
        terminal_id,
        query.cursor,
        WireFormat::Json,
    )
    .await
}

async fn workspace_log(
    State(state): State<AppState>,
    Path((workspace_id, terminal_id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ControllerError> {
    open_stream(
        state,
        headers,
        StreamTarget::Workspace(workspace_id),
        terminal_id,
        query.cursor,
        WireFormat::PlainText,
    )
    .await
}

async fn open_stream(
    state: AppState,
    headers: HeaderMap,
    target: StreamTarget,
    terminal_id: String,
    cursor: Option<u64>,
    format: WireFormat,
) -> Result<Response, ControllerError> {
    let principal = state.auth.authenticate(&headers).await;
    let prepared = state
        .controller
        .prepare(principal.as_ref(), target, &terminal_id, cursor, format)
        .await?;

    let (body, sink) = body::channel(prepared.session.abort_handle(), prepared.session.signal());
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, format.content_type())
        .header(TRANSFER_ENCODING, "chunked")
        .header(CACHE_CONTROL, "no-cache")
        .body(body);
    let response = match response {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "failed to build log stream response");
            return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    let controller = Arc::clone(&state.controller);
    tokio::spawn(async move {
        let session_id = prepared.session.id;
        let outcome = controller.stream(prepared, sink).await;
        debug!(%session_id, ?outcome, "log stream session ended");
    });

    Ok(response)
}
