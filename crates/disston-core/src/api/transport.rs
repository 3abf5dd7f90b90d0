//! HTTP transport: one request in, one response or one [`ApiError`] out.
//!
//! The transport does no retrying and no caching. Every failure, whether a
//! non-2xx status, a timeout, a dropped connection or a cancellation, is
//! normalized into [`ApiError`] here so that callers only ever see one shape.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ApiError;
use crate::config::ClientConfig;

/// A request against the club API, addressed by unencoded path segments.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn put<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::PUT, segments)
    }

    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::DELETE, segments)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Human-readable path for logs, e.g. `/players/roster`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// A successful (2xx) response with its body read to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    status: u16,
    body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the body as JSON. An empty body parses as `null`, so `()` and
    /// `Option<T>` accept empty responses.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let text = if self.body.trim().is_empty() { "null" } else { &self.body };
        serde_json::from_str(text).map_err(|e| ApiError::bad_response(self.status, e))
    }
}

/// The network seam. Implementations must honor `cancel` and must report
/// every failure as exactly one [`ApiError`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest, cancel: CancellationToken) -> Result<ApiResponse, ApiError>;
}

/// Production transport on `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid API base URL: {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", config.base_url);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join the request's segments onto the base URL, percent-encoding each
    /// segment (so ids behave like `encodeURIComponent`).
    fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::network("base URL cannot be a base"))?
            .pop_if_empty()
            .extend(request.segments());
        if !request.query_pairs().is_empty() {
            url.query_pairs_mut()
                .extend_pairs(request.query_pairs().iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }

    fn normalize(err: &reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::timeout()
        } else if let Some(status) = err.status() {
            ApiError::from_response(status.as_u16(), "")
        } else {
            ApiError::network(err)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest, cancel: CancellationToken) -> Result<ApiResponse, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::cancelled());
        }

        let url = self.url_for(&request)?;
        let mut builder = self.client.request(request.method().clone(), url);
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let exchange = async {
            let response = builder.send().await.map_err(|e| Self::normalize(&e))?;
            let status = response.status();
            let body = response.text().await.map_err(|e| Self::normalize(&e))?;
            Ok::<_, ApiError>((status, body))
        };

        // Polling the exchange first means an abort that races a completed
        // response is ignored.
        let (status, body) = tokio::select! {
            biased;
            result = exchange => result?,
            () = cancel.cancelled() => {
                debug!(method = %request.method(), path = %request.path(), "Request cancelled");
                return Err(ApiError::cancelled());
            }
        };

        debug!(method = %request.method(), path = %request.path(), status = status.as_u16(), "Response received");

        if status.is_success() {
            Ok(ApiResponse::new(status.as_u16(), body))
        } else {
            Err(ApiError::from_response(status.as_u16(), &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        let config = ClientConfig {
            base_url: base.to_string(),
            ..ClientConfig::default()
        };
        HttpTransport::new(&config).expect("valid test config")
    }

    #[test]
    fn test_url_for_encodes_segments() {
        let t = transport("http://localhost:8000");
        let url = t
            .url_for(&ApiRequest::put(["players", "a b/c", "approve"]))
            .expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/players/a%20b%2Fc/approve");
    }

    #[test]
    fn test_url_for_keeps_base_path_and_trailing_slash() {
        let t = transport("https://club.example.com/backend/");
        let url = t.url_for(&ApiRequest::get(["api", "leagues", ""])).expect("url");
        assert_eq!(url.as_str(), "https://club.example.com/backend/api/leagues/");
    }

    #[test]
    fn test_url_for_appends_query() {
        let t = transport("http://localhost:8000");
        let url = t
            .url_for(&ApiRequest::get(["api", "matches", "upcoming"]).query("limit", 5))
            .expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/api/matches/upcoming?limit=5");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = ClientConfig {
            base_url: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(HttpTransport::new(&config).is_err());
    }

    #[test]
    fn test_response_json_empty_body() {
        let response = ApiResponse::new(204, "");
        assert!(response.json::<()>().is_ok());
        assert_eq!(response.json::<Option<Vec<i32>>>().expect("null"), None);
    }

    #[test]
    fn test_response_json_parse_failure_keeps_status() {
        let response = ApiResponse::new(200, "{not json");
        let err = response.json::<Vec<i32>>().expect_err("should fail");
        assert_eq!(err.status(), 200);
        assert_eq!(err.code(), Some("ERR_BAD_RESPONSE"));
    }

    #[test]
    fn test_request_path_for_logs() {
        assert_eq!(ApiRequest::get(["players", "roster"]).path(), "/players/roster");
    }
}
