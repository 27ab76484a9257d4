//! Prometheus metrics and the HTTP endpoint serving them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use log::info;
use prometheus::{CounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pools_totals: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let pools_totals = CounterVec::new(
            Opts::new(
                "pools_totals",
                "Number of created/updated load balancer pools.",
            )
            .namespace("lbsync"),
            &["status"],
        )?;
        registry.register(Box::new(pools_totals.clone()))?;

        Ok(Self {
            registry,
            pools_totals,
        })
    }

    /// Count a pool create/update attempt by outcome.
    pub fn record_pool(&self, succeeded: bool) {
        let status = if succeeded { "succeeded" } else { "failed" };
        self.pools_totals.with_label_values(&[status]).inc();
    }

    #[cfg(test)]
    pub fn pool_count(&self, status: &str) -> f64 {
        self.pools_totals.with_label_values(&[status]).get()
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Claim the metrics address up front so a taken port fails startup.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed binding metrics endpoint to {}", addr))
}

/// Serve `/metrics` on `listener` until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    metrics: Metrics,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Serving Prometheus metrics on {}", listener.local_addr()?);

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}
