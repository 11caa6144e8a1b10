//! ProxyServer struct and main run loop.
//!
//! The server owns the swap controller and the request handler, and runs the
//! accept loop that feeds hyper connections into the handler.

use super::client::create_http_client;
use super::context::ProxyRequest;
use super::forwarding::{error_response, HyperUpstreamClient, UpstreamClient};
use super::handler::ProxyHandler;
use super::network::create_listener;
use crate::config::Config;
use crate::engine::ConfigSwap;
use anyhow::Context;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// The main proxy server struct.
pub struct ProxyServer {
    handler: Arc<ProxyHandler>,
}

impl ProxyServer {
    /// Create a server that forwards through the pooled hyper client.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let http_client = create_http_client(&config.connection_pool);
        let swap = Arc::new(ConfigSwap::new(config)?);
        Ok(Self::with_client(
            swap,
            Arc::new(HyperUpstreamClient::new(http_client)),
        ))
    }

    /// Create a server over an existing swap controller and backend client.
    pub fn with_client(
        swap: Arc<ConfigSwap>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            handler: Arc::new(ProxyHandler::new(swap, client)),
        }
    }

    pub fn swap(&self) -> &Arc<ConfigSwap> {
        self.handler.swap()
    }

    pub fn handler(&self) -> Arc<ProxyHandler> {
        Arc::clone(&self.handler)
    }

    /// Bind the listen address of the active configuration.
    pub fn bind(&self) -> Result<TcpListener, anyhow::Error> {
        let snapshot = self.swap().current();
        let server = &snapshot.config().server;
        let addr = (server.host.as_str(), server.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid listen address {}:{}", server.host, server.port))?
            .next()
            .with_context(|| format!("No address for {}:{}", server.host, server.port))?;
        let listener =
            create_listener(addr).with_context(|| format!("Failed to bind {addr}"))?;
        Ok(listener)
    }

    /// Run the proxy server, accepting connections and handling requests.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        let snapshot = self.swap().current();
        info!("Listening on http://{}", listener.local_addr()?);
        info!("Proxying to {}", snapshot.config().target.url);
        info!(
            "Loaded {} endpoints with {} failure rules",
            snapshot.endpoints().len(),
            snapshot.counters().len()
        );
        drop(snapshot);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let handler = Arc::clone(&self.handler);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    async move { serve_request(&handler, req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(
                        "Error serving HTTP connection from {}: {}",
                        remote_addr, err
                    );
                }
            });
        }
    }
}

async fn serve_request(
    handler: &ProxyHandler,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let request = match ProxyRequest::from_hyper(req).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return Ok(
                error_response(StatusCode::BAD_REQUEST, "Failed to read request body")
                    .into_hyper(),
            );
        }
    };
    Ok(handler.handle(request).await.into_hyper())
}
