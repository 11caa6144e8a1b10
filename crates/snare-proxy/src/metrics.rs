//! Prometheus metrics for snare-proxy.
//!
//! Tracks injected failures and delays, backend errors, and config reloads.
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static! {
    /// Total number of requests answered by the proxy
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "snare_requests_total",
        "Total number of requests answered by the proxy",
        &["method", "status", "outcome"]  // outcome: forwarded|injected|unmatched|upstream_error|timeout
    )
    .unwrap();

    /// Synthetic failures returned instead of contacting the backend
    pub static ref FAILURES_INJECTED_TOTAL: CounterVec = register_counter_vec!(
        "snare_failures_injected_total",
        "Total number of injected failure responses",
        &["endpoint", "status"]
    )
    .unwrap();

    /// Injected delay in milliseconds
    pub static ref DELAY_INJECTED_MS: Histogram = register_histogram!(
        "snare_delay_injected_ms",
        "Histogram of injected delays in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap();

    /// Delays cut short because the caller went away or the request timed out
    pub static ref DELAYS_INTERRUPTED_TOTAL: Counter = register_counter!(
        "snare_delays_interrupted_total",
        "Injected delays that were dropped before completing"
    )
    .unwrap();

    /// Backend transport failures
    pub static ref UPSTREAM_ERRORS_TOTAL: Counter = register_counter!(
        "snare_upstream_errors_total",
        "Forwarded requests that failed at the transport level"
    )
    .unwrap();

    /// Requests that matched no configured endpoint
    pub static ref UNMATCHED_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "snare_unmatched_requests_total",
        "Requests that matched no configured endpoint",
        &["policy"]  // policy: reject|forward
    )
    .unwrap();

    pub static ref CONFIG_RELOADS_TOTAL: CounterVec = register_counter_vec!(
        "snare_config_reloads_total",
        "Configuration reload attempts",
        &["result"]  // result: applied|rejected
    )
    .unwrap();

    pub static ref CONFIG_GENERATION: Gauge = register_gauge!(
        "snare_config_generation",
        "Generation number of the active configuration"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(method: &str, status: u16, outcome: &str) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string(), outcome])
        .inc();
}

pub fn record_failure_injected(endpoint: &str, status: u16) {
    FAILURES_INJECTED_TOTAL
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

pub fn record_delay(duration_ms: u64) {
    DELAY_INJECTED_MS.observe(duration_ms as f64);
}

pub fn record_delay_interrupted() {
    DELAYS_INTERRUPTED_TOTAL.inc();
}

pub fn record_upstream_error() {
    UPSTREAM_ERRORS_TOTAL.inc();
}

pub fn record_unmatched(policy: &str) {
    UNMATCHED_REQUESTS_TOTAL.with_label_values(&[policy]).inc();
}

pub fn record_config_reload(applied: bool, generation: u64) {
    let result = if applied { "applied" } else { "rejected" };
    CONFIG_RELOADS_TOTAL.with_label_values(&[result]).inc();
    CONFIG_GENERATION.set(generation as f64);
}

pub fn set_config_generation(generation: u64) {
    CONFIG_GENERATION.set(generation as f64);
}

async fn metrics_service(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .header("content-type", "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(collect_metrics()))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"not found"))),
    };
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// Serve `GET /metrics` on `listener` until the task is dropped.
pub async fn serve_metrics(listener: TcpListener) -> Result<(), anyhow::Error> {
    info!("Metrics available on http://{}/metrics", listener.local_addr()?);
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_service))
                .await
            {
                error!("Error serving metrics to {}: {}", remote_addr, err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_contains_recorded_series() {
        record_failure_injected("/metrics-test", 503);
        record_request("POST", 503, "injected");
        record_config_reload(true, 3);

        let text = collect_metrics();
        assert!(text.contains("snare_failures_injected_total"));
        assert!(text.contains(r#"endpoint="/metrics-test""#));
        assert!(text.contains("snare_requests_total"));
        assert!(text.contains("snare_config_reloads_total"));
    }

    #[tokio::test]
    async fn test_serve_metrics_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_metrics(listener));

        record_upstream_error();
        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("snare_upstream_errors_total"));

        let missing = reqwest::get(format!("http://{addr}/other")).await.unwrap();
        assert_eq!(missing.status().as_u16(), 404);
        server.abort();
    }
}
