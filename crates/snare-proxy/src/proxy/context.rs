//! Request and response values passed through the proxy core.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};

/// Inbound request, fully buffered.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    /// Build a request from a method and a `path?query` target.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Collect a hyper request into a `ProxyRequest`.
    pub async fn from_hyper<B>(req: Request<B>) -> Result<Self, B::Error>
    where
        B: Body,
    {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_query() {
        let req = ProxyRequest::new(Method::GET, "/api/users?page=2&sort=name");
        assert_eq!(req.path, "/api/users");
        assert_eq!(req.query.as_deref(), Some("page=2&sort=name"));

        let req = ProxyRequest::new(Method::GET, "/plain");
        assert!(req.query.is_none());
    }

    #[tokio::test]
    async fn test_from_hyper_collects_body() {
        let req = Request::builder()
            .method(Method::PUT)
            .uri("http://proxy.local/items/7?dry=true")
            .header("x-trace", "abc")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();

        let req = ProxyRequest::from_hyper(req).await.unwrap();
        assert_eq!(req.method, Method::PUT);
        assert_eq!(req.path, "/items/7");
        assert_eq!(req.query.as_deref(), Some("dry=true"));
        assert_eq!(req.headers["x-trace"], "abc");
        assert_eq!(req.body, Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_into_hyper_preserves_parts() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", "value".parse().unwrap());
        let response = ProxyResponse::new(StatusCode::NOT_FOUND, headers, Bytes::from("nf"))
            .into_hyper();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-custom"], "value");
    }
}
