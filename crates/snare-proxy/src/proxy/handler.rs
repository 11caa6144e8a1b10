//! Request handling and failure injection.
//!
//! Each request takes one snapshot of the active configuration, resolves its
//! endpoint, evaluates the endpoint's failure rules and then either answers
//! with the canned failure or forwards to the backend.

use super::context::{ProxyRequest, ProxyResponse};
use super::delay::apply_delay;
use super::forwarding::{error_response, relay_response, UpstreamClient, UpstreamRequest};
use super::headers::{
    build_upstream_headers, SnareHeadersExt, VALUE_ERROR, X_SNARE_DELAY_MS, X_SNARE_ENDPOINT,
    X_SNARE_FAULT, X_SNARE_RULE,
};
use crate::config::UnmatchedPolicy;
use crate::engine::{evaluate, CompiledEndpoint, ConfigSwap, Disposition, Snapshot};
use crate::metrics;
use hyper::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest body excerpt written by request tracing, in characters.
const MAX_LOGGED_BODY_CHARS: usize = 1000;

/// How a request was answered, used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Forwarded,
    Injected,
    Unmatched,
    UpstreamError,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Injected => "injected",
            Outcome::Unmatched => "unmatched",
            Outcome::UpstreamError => "upstream_error",
            Outcome::Timeout => "timeout",
        }
    }
}

pub struct ProxyHandler {
    swap: Arc<ConfigSwap>,
    client: Arc<dyn UpstreamClient>,
}

impl ProxyHandler {
    pub fn new(swap: Arc<ConfigSwap>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { swap, client }
    }

    pub fn swap(&self) -> &Arc<ConfigSwap> {
        &self.swap
    }

    /// Handle one request end to end. Never fails: every error becomes a
    /// response.
    pub async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        self.handle_with_outcome(request).await.0
    }

    pub async fn handle_with_outcome(&self, request: ProxyRequest) -> (ProxyResponse, Outcome) {
        let start_time = Instant::now();
        let snapshot = self.swap.current();
        let method = request.method.clone();
        let path = request.path.clone();

        let timeout = snapshot
            .config()
            .server
            .request_timeout_ms
            .map(Duration::from_millis);

        let (response, outcome) = match timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.dispatch(&snapshot, request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            "Request {} {} timed out after {}ms",
                            method,
                            path,
                            limit.as_millis()
                        );
                        (
                            error_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout"),
                            Outcome::Timeout,
                        )
                    }
                }
            }
            None => self.dispatch(&snapshot, request).await,
        };

        debug!(
            "{} {} -> {} ({}, {:.1}ms, generation {})",
            method,
            path,
            response.status.as_u16(),
            outcome.as_str(),
            start_time.elapsed().as_secs_f64() * 1000.0,
            snapshot.generation()
        );
        metrics::record_request(method.as_str(), response.status.as_u16(), outcome.as_str());
        (response, outcome)
    }

    async fn dispatch(
        &self,
        snapshot: &Snapshot,
        request: ProxyRequest,
    ) -> (ProxyResponse, Outcome) {
        let Some(endpoint) = snapshot.match_endpoint(&request.method, &request.path) else {
            return self.handle_unmatched(snapshot, request).await;
        };

        let trace = endpoint.debug || snapshot.config().server.debug;
        if trace {
            log_request(endpoint, &request);
        }

        match evaluate(endpoint, &request.method, snapshot.counters()) {
            Disposition::Forward => self.forward(snapshot, request, trace).await,
            Disposition::ForwardAfterDelay { delay, rule } => {
                info!(
                    "Delaying {} {} by {}ms (endpoint {}, rule {})",
                    request.method,
                    request.path,
                    delay.as_millis(),
                    endpoint.path,
                    rule
                );
                apply_delay(delay).await;
                let (mut response, outcome) = self.forward(snapshot, request, trace).await;
                response
                    .headers
                    .set_header_value(&X_SNARE_DELAY_MS, &delay.as_millis().to_string());
                (response, outcome)
            }
            Disposition::Fail {
                delay,
                response,
                rule,
            } => {
                if let Some(delay) = delay {
                    apply_delay(delay).await;
                }
                info!(
                    "Injecting {} for {} {} (endpoint {}, rule {})",
                    response.status.as_u16(),
                    request.method,
                    request.path,
                    endpoint.path,
                    rule
                );
                metrics::record_failure_injected(&endpoint.path, response.status.as_u16());

                let mut headers = response.headers.clone();
                headers.set_header(&X_SNARE_FAULT, &VALUE_ERROR);
                headers.set_header_value(&X_SNARE_ENDPOINT, &endpoint.path);
                headers.set_header_value(&X_SNARE_RULE, &rule.to_string());
                if let Some(delay) = delay {
                    headers.set_header_value(&X_SNARE_DELAY_MS, &delay.as_millis().to_string());
                }
                let injected = ProxyResponse::new(response.status, headers, response.body.clone());
                if trace {
                    log_response(endpoint, &injected);
                }
                (injected, Outcome::Injected)
            }
        }
    }

    async fn handle_unmatched(
        &self,
        snapshot: &Snapshot,
        request: ProxyRequest,
    ) -> (ProxyResponse, Outcome) {
        match snapshot.unmatched_policy() {
            UnmatchedPolicy::Reject => {
                debug!("No endpoint for {} {}", request.method, request.path);
                metrics::record_unmatched("reject");
                (
                    error_response(StatusCode::NOT_FOUND, "Not Found"),
                    Outcome::Unmatched,
                )
            }
            UnmatchedPolicy::Forward => {
                metrics::record_unmatched("forward");
                self.forward(snapshot, request, snapshot.config().server.debug)
                    .await
            }
        }
    }

    async fn forward(
        &self,
        snapshot: &Snapshot,
        request: ProxyRequest,
        trace: bool,
    ) -> (ProxyResponse, Outcome) {
        let url = snapshot.upstream_url(&request.path, request.query.as_deref());
        let headers = build_upstream_headers(
            &request.headers,
            snapshot.default_headers(),
            snapshot.override_client_headers(),
        );
        if trace {
            info!("Outbound {} {}", request.method, url);
            info!("Outbound headers: {}", format_headers(&headers));
        }

        let upstream = UpstreamRequest {
            method: request.method,
            url,
            headers,
            body: request.body,
        };
        let target = upstream.url.clone();

        match self.client.send(upstream).await {
            Ok(response) => {
                let response = relay_response(response);
                if trace {
                    info!(
                        "Backend answered {} with {}: headers {} body {}",
                        target,
                        response.status.as_u16(),
                        format_headers(&response.headers),
                        describe_body(&response.body)
                    );
                }
                (response, Outcome::Forwarded)
            }
            Err(e) => {
                error!("Failed to forward request to {}: {}", target, e);
                metrics::record_upstream_error();
                (
                    error_response(StatusCode::BAD_GATEWAY, "Bad Gateway"),
                    Outcome::UpstreamError,
                )
            }
        }
    }
}

fn log_request(endpoint: &CompiledEndpoint, request: &ProxyRequest) {
    info!(
        "[{}] {} {}{}",
        endpoint.path,
        request.method,
        request.path,
        request
            .query
            .as_deref()
            .map(|q| format!("?{q}"))
            .unwrap_or_default()
    );
    if let Some(query) = request.query.as_deref() {
        info!("[{}] Query parameters: {}", endpoint.path, query);
    }
    info!(
        "[{}] Headers: {}",
        endpoint.path,
        format_headers(&request.headers)
    );
    info!(
        "[{}] Body: {}",
        endpoint.path,
        describe_body(&request.body)
    );
}

fn log_response(endpoint: &CompiledEndpoint, response: &ProxyResponse) {
    info!(
        "[{}] Responding {}: headers {} body {}",
        endpoint.path,
        response.status.as_u16(),
        format_headers(&response.headers),
        describe_body(&response.body)
    );
}

fn format_headers(headers: &HeaderMap) -> String {
    let pairs: Vec<String> = headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<non-ascii>")))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Printable excerpt of a body for logs.
pub(crate) fn describe_body(body: &[u8]) -> String {
    if body.is_empty() {
        return "<empty>".to_string();
    }
    match std::str::from_utf8(body) {
        Ok(text) => match text.char_indices().nth(MAX_LOGGED_BODY_CHARS) {
            Some((cut, _)) => format!("{}... ({} bytes total)", &text[..cut], body.len()),
            None => text.to_string(),
        },
        Err(_) => format!("<binary data, {} bytes>", body.len()),
    }
}
