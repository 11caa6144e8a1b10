use anyhow::Context;
use clap::Parser;
use snare_proxy::config::{resolve_config_path, Config};
use snare_proxy::watcher::ConfigWatcher;
use snare_proxy::{logging, metrics, ProxyServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// HTTP debug proxy with configurable failure injection
#[derive(Parser, Debug)]
#[command(name = "snare", author, version, about)]
struct Args {
    /// Path to the YAML configuration
    #[arg(short, long, env = "SNARE_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.port`
    #[arg(short, long, env = "SNARE_PORT")]
    port: Option<u16>,

    /// Override `server.host`
    #[arg(long, env = "SNARE_HOST")]
    host: Option<String>,

    /// Do not reload the configuration when the file changes
    #[arg(long)]
    no_watch: bool,

    /// How often the configuration file is checked for changes
    #[arg(long, default_value_t = 1000)]
    watch_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    let log_handle = logging::init(config.logging.filter_directive())?;
    info!("Loaded configuration from {}", config_path.display());

    let metrics_config = config.metrics.clone();
    let server = ProxyServer::new(config)?;
    let swap = Arc::clone(server.swap());
    metrics::set_config_generation(swap.current().generation());

    if !args.no_watch {
        let swap = Arc::clone(&swap);
        let log_handle = log_handle.clone();
        ConfigWatcher::new(&config_path, Duration::from_millis(args.watch_interval_ms)).spawn(
            move |path| {
                if let Ok(snapshot) = swap.reload_from_file(path) {
                    let level = snapshot.config().logging.filter_directive();
                    if let Err(e) = log_handle.set_level(level) {
                        warn!("Failed to apply log level {}: {}", level, e);
                    }
                }
            },
        );
        info!("Watching {} for changes", config_path.display());
    }

    if metrics_config.enabled {
        let addr = format!("0.0.0.0:{}", metrics_config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(listener).await {
                error!("Metrics server stopped: {}", e);
            }
        });
    }

    #[cfg(unix)]
    {
        let swap = Arc::clone(&swap);
        let mut usr1 =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
                .context("Failed to install SIGUSR1 handler")?;
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                swap.reset_counters();
            }
        });
    }

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
