use crate::error::{ProxyError, Result};
use crate::pool::{Task, WorkerPool};
use crate::proxy::ProxyHandler;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Accepts client connections and hands each one to the worker pool.
pub struct Dispatcher {
    listener: TcpListener,
    pool: WorkerPool,
    handler: Arc<ProxyHandler>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        listener: TcpListener,
        pool: WorkerPool,
        handler: Arc<ProxyHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            pool,
            handler,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until the shutdown token is cancelled, then drain the pool.
    ///
    /// `accept` blocks, so whoever cancels the token must also call [`wake`]
    /// to get the loop to look at it.
    pub fn run(self) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "accepting connections");

        for incoming in self.listener.incoming() {
            if self.shutdown.is_cancelled() {
                break;
            }
            match incoming {
                Ok(stream) => {
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "unknown".to_string());
                    let handler = Arc::clone(&self.handler);
                    let task = Task::new(peer.clone(), move || handler.serve(stream, &peer));
                    match self.pool.submit(task) {
                        Ok(_) => {}
                        Err(ProxyError::PoolClosed) => break,
                        Err(e) => tracing::error!(error = %e, "failed to queue connection"),
                    }
                }
                Err(e) => {
                    metrics::counter!("proxy_accept_errors_total").increment(1);
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }

        tracing::info!(pending = self.pool.pending(), "listener closed, draining workers");
        self.pool.shutdown();
        Ok(())
    }
}

/// Unblock a pending `accept` on `addr` so the loop can observe shutdown.
pub fn wake(addr: SocketAddr) {
    let target = if addr.ip().is_unspecified() {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
    } else {
        addr
    };
    if let Err(e) = TcpStream::connect_timeout(&target, Duration::from_secs(1)) {
        tracing::debug!(error = %e, addr = %target, "wake connection failed");
    }
}
