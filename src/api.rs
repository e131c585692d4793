//! Log server API client.
//!
//! [`HeadlessLogApi`] is the metadata collaborator the watcher asks for
//! stream endpoints and for whether an instance has finished.
//! [`StreamClient`] opens the stream endpoints themselves.

use std::time::Duration;

use async_trait::async_trait;
use hlog_protocol::{HeadlessLogUrls, CURSOR_QUERY_PARAM, HEADLESS_LOG_ROUTE};
use reqwest::header::{CACHE_CONTROL, CONNECTION, PRAGMA};

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Stream metadata and completion checks.
#[async_trait]
pub trait HeadlessLogApi: Send + Sync {
    /// Published stream endpoints for an instance.
    async fn headless_log_urls(&self, instance_id: &str) -> Result<HeadlessLogUrls, ApiError>;

    /// Whether the instance has finished producing output. Idempotent.
    async fn is_done(&self, instance_id: &str) -> Result<bool, ApiError>;
}

/// Build the shared HTTP client.
pub fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("headless-logs/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// [`HeadlessLogApi`] over the log server's metadata endpoint.
#[derive(Debug, Clone)]
pub struct HttpLogApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpLogApi {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn urls_endpoint(&self, instance_id: &str) -> String {
        format!("{}{}/{}", self.base_url, HEADLESS_LOG_ROUTE, instance_id)
    }
}

#[async_trait]
impl HeadlessLogApi for HttpLogApi {
    async fn headless_log_urls(&self, instance_id: &str) -> Result<HeadlessLogUrls, ApiError> {
        let url = self.urls_endpoint(instance_id);
        let mut request = self.http.get(&url).header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn is_done(&self, instance_id: &str) -> Result<bool, ApiError> {
        Ok(!self.headless_log_urls(instance_id).await?.online)
    }
}

/// Opens stream endpoints with the watcher's request policy.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl StreamClient {
    pub fn new(http: reqwest::Client, token: Option<String>) -> Self {
        Self { http, token }
    }

    /// GET a stream URL, uncached and kept alive, resuming after `cursor`
    /// bytes when given.
    pub async fn open(&self, url: &str, cursor: Option<u64>) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .http
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .header(CONNECTION, "keep-alive");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(cursor) = cursor {
            request = request.query(&[(CURSOR_QUERY_PARAM, cursor)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_urls_and_is_done() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/headless-logs/inst-1"))
            .and(header("authorization", "Bearer t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "online": false,
                "streams": {"0": "http://x/headless-logs/inst-1/0"}
            })))
            .mount(&server)
            .await;

        let api = HttpLogApi::new(reqwest::Client::new(), format!("{}/", server.uri()), Some("t-1".into()));
        let urls = api.headless_log_urls("inst-1").await.unwrap();
        assert_eq!(urls.first_stream(), Some(("0", "http://x/headless-logs/inst-1/0")));
        assert!(api.is_done("inst-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let api = HttpLogApi::new(reqwest::Client::new(), server.uri(), None);
        assert!(matches!(
            api.headless_log_urls("inst-1").await,
            Err(ApiError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_request_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/headless-logs/inst-1/0"))
            .and(header("cache-control", "no-cache"))
            .and(header("authorization", "Bearer t-1"))
            .and(query_param("cursor", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = StreamClient::new(reqwest::Client::new(), Some("t-1".into()));
        let url = format!("{}/headless-logs/inst-1/0", server.uri());
        assert!(client.open(&url, Some(42)).await.is_ok());
    }
}
