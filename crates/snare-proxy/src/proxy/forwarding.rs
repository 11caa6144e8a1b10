//! Request forwarding to the backend.
//!
//! The handler talks to the backend through [`UpstreamClient`] so tests can
//! substitute an in-memory backend for the pooled hyper client.

use super::client::HttpClient;
use super::context::ProxyResponse;
use super::headers::{strip_hop_by_hop, SnareHeadersExt, VALUE_TRUE, X_SNARE_PROXIED};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{HeaderMap, Method, Request, StatusCode};
use thiserror::Error;
use tracing::debug;

/// A fully formed outbound request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build upstream request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("upstream request failed: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read upstream response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<ProxyResponse, TransportError>;
}

/// Backend client over the shared hyper connection pool.
#[derive(Clone)]
pub struct HyperUpstreamClient {
    client: HttpClient,
}

impl HyperUpstreamClient {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamClient for HyperUpstreamClient {
    async fn send(&self, request: UpstreamRequest) -> Result<ProxyResponse, TransportError> {
        debug!("Forwarding to: {} {}", request.method, request.url);

        let mut builder = Request::builder().method(request.method).uri(&request.url);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }
        let upstream_req = builder.body(Full::new(request.body))?;

        let upstream_response = self.client.request(upstream_req).await?;
        let (parts, body) = upstream_response.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(ProxyResponse::new(parts.status, parts.headers, body))
    }
}

/// Prepare a backend response for relay to the caller.
pub fn relay_response(mut response: ProxyResponse) -> ProxyResponse {
    strip_hop_by_hop(&mut response.headers);
    // hyper recomputes the length from the buffered body
    response.headers.remove(CONTENT_LENGTH);
    response.headers.set_header(&X_SNARE_PROXIED, &VALUE_TRUE);
    response
}

/// Helper function to create a JSON error response.
pub fn error_response(status: StatusCode, message: &str) -> ProxyResponse {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    ProxyResponse::new(status, headers, Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_is_json() {
        let response = error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "Bad Gateway");
    }

    #[test]
    fn test_error_response_escapes_message() {
        let response = error_response(StatusCode::BAD_REQUEST, r#"bad "quote""#);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], r#"bad "quote""#);
    }

    #[test]
    fn test_relay_marks_and_strips() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("content-length", "5".parse().unwrap());
        headers.insert("etag", "\"v1\"".parse().unwrap());

        let relayed = relay_response(ProxyResponse::new(
            StatusCode::OK,
            headers,
            Bytes::from_static(b"hello"),
        ));
        assert_eq!(relayed.headers[&X_SNARE_PROXIED], "true");
        assert_eq!(relayed.headers["etag"], "\"v1\"");
        assert!(relayed.headers.get("transfer-encoding").is_none());
        assert!(relayed.headers.get("content-length").is_none());
        assert_eq!(relayed.body, Bytes::from_static(b"hello"));
    }
}
