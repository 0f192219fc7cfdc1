//! Admin HTTP surface: JSON stats and the Prometheus scrape endpoint.

use crate::dash::Representation;
use crate::proxy::ProxyHandler;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AdminState {
    pub handler: Arc<ProxyHandler>,
    pub prometheus: Option<PrometheusHandle>,
    pub started: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub cache: CacheMetrics,
    pub resolver_entries: usize,
    pub bandwidth: BandwidthMetrics,
    pub manifest: Option<ManifestMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BandwidthMetrics {
    pub estimate_kbps: f64,
    pub samples_kbps: Vec<f64>,
    pub window: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestMetrics {
    pub host: String,
    pub base_dir: String,
    pub age_seconds: u64,
    pub representations: Vec<Representation>,
}

impl StatsSnapshot {
    pub fn collect(handler: &ProxyHandler, started: Instant) -> Self {
        let stats = handler.cache().stats();
        let lookups = stats.hits + stats.misses;
        let bandwidth = handler.bandwidth();

        StatsSnapshot {
            uptime_seconds: started.elapsed().as_secs(),
            cache: CacheMetrics {
                hit_rate: if lookups > 0 {
                    stats.hits as f64 / lookups as f64
                } else {
                    0.0
                },
                hits: stats.hits,
                misses: stats.misses,
                evictions: stats.evictions,
                size: stats.current_size,
                capacity: stats.capacity,
            },
            resolver_entries: handler.resolver().len(),
            bandwidth: BandwidthMetrics {
                estimate_kbps: bandwidth.estimate(handler.settings().default_bandwidth_kbps),
                samples_kbps: bandwidth.samples(),
                window: bandwidth.window(),
            },
            manifest: handler.manifest().map(|m| ManifestMetrics {
                host: m.host.clone(),
                base_dir: m.base_dir.clone(),
                age_seconds: m.loaded_at.elapsed().as_secs(),
                representations: m.engine.representations().to_vec(),
            }),
        }
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<AdminState>) -> Json<StatsSnapshot> {
    Json(StatsSnapshot::collect(&state.handler, state.started))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AdminState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Serve the admin router until `shutdown` is cancelled.
pub async fn run_admin_server(addr: String, state: AdminState, shutdown: CancellationToken) {
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind admin listener");
            return;
        }
    };
    tracing::info!(addr = %addr, "admin server listening");

    if let Err(e) = axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "admin server error");
    }
}
