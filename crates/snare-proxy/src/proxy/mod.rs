//! Proxy server module.
//!
//! This module provides the debug proxy with support for:
//! - Counter-driven and probabilistic failure injection
//! - Injected latency, alone or ahead of a failure
//! - Transparent forwarding with configured default headers
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and main run loop
//! - `handler` - Per-request orchestration (match, evaluate, fail or forward)
//! - `forwarding` - Backend client seam and response relay
//! - `client` - HTTP client creation and configuration
//! - `delay` - Injected latency
//! - `network` - Listener setup

mod client;
mod context;
mod delay;
mod forwarding;
mod handler;
mod headers;
mod network;
mod server;


pub use client::{create_http_client, HttpClient};
pub use context::{ProxyRequest, ProxyResponse};
pub use forwarding::{
    error_response, HyperUpstreamClient, TransportError, UpstreamClient, UpstreamRequest,
};
pub use handler::{Outcome, ProxyHandler};
pub use headers::{
    build_upstream_headers, X_SNARE_DELAY_MS, X_SNARE_ENDPOINT, X_SNARE_FAULT, X_SNARE_PROXIED,
    X_SNARE_RULE,
};
pub use server::ProxyServer;
