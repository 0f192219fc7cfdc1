mod admin;
mod cache_layer;
mod codec;
mod config;
mod dash;
mod dispatcher;
mod error;
mod pool;
mod proxy;
mod resolver;
#[cfg(test)]
mod testing;
mod transport;

use admin::AdminState;
use clap::Parser;
use config::Config;
use dispatcher::Dispatcher;
use pool::WorkerPool;
use proxy::ProxyHandler;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proxy-server", about = "Caching forward HTTP proxy with DASH bitrate steering")]
struct Args {
    /// Path to the TOML config file; defaults apply when it does not exist
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => {
            tracing::info!("proxy shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "proxy failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.config.exists() {
        let c = Config::load(&args.config)?;
        tracing::info!(path = %args.config.display(), "loaded config");
        c
    } else {
        tracing::info!(path = %args.config.display(), "no config file found, using defaults");
        Config::default_config()
    };

    if let Some(port) = args.port {
        let mut addr: SocketAddr = config.server.listen_addr.parse()?;
        addr.set_port(port);
        config.server.listen_addr = addr.to_string();
    }
    if let Some(workers) = args.workers {
        config.server.workers = workers;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let prometheus = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder unavailable");
            None
        }
    };

    let handler = Arc::new(ProxyHandler::from_config(&config)?);
    let pool = WorkerPool::new(config.server.workers)?;
    let listener = TcpListener::bind(&config.server.listen_addr)?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("admin")
        .enable_all()
        .build()?;

    runtime.spawn(admin::run_admin_server(
        config.server.admin_addr.clone(),
        AdminState {
            handler: Arc::clone(&handler),
            prometheus,
            started: Instant::now(),
        },
        shutdown.clone(),
    ));
    runtime.spawn(shutdown_signal(shutdown.clone(), local_addr));

    tracing::info!(
        listen = %local_addr,
        admin = %config.server.admin_addr,
        workers = pool.size(),
        cache_capacity = config.cache.capacity(),
        default_bandwidth_kbps = config.abr.default_bandwidth_kbps,
        "proxy starting"
    );

    let result = Dispatcher::new(listener, pool, handler, shutdown.clone()).run();

    shutdown.cancel();
    runtime.shutdown_timeout(Duration::from_secs(2));
    result.map_err(Into::into)
}

/// Wait for SIGINT or SIGTERM, cancel the token and wake the accept loop.
async fn shutdown_signal(token: CancellationToken, listen_addr: SocketAddr) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting on ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    tracing::info!("shutdown signal received, draining connections...");
    token.cancel();
    // accept() is blocking; poke it from a blocking thread
    if let Err(e) = tokio::task::spawn_blocking(move || dispatcher::wake(listen_addr)).await {
        tracing::warn!(error = %e, "failed to wake listener");
    }
}
