//! lbsync daemon entry point.

use std::sync::Arc;

use anyhow::Context;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::signal;
use tokio::sync::{mpsc, watch};

mod cloudflare;
mod config;
mod controller;
mod error;
mod membership;
mod metrics;
mod scheduler;
mod types;

use cloudflare::http::Credentials;
use cloudflare::{CloudflareApi, LoadBalancerClient};
use config::Config;
use controller::{Controller, Outcome};
use membership::{KubernetesMembership, MembershipSource};
use metrics::Metrics;
use scheduler::{debounce, run_ticker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting lbsync with config: {:?}", cfg);

    let metrics = Metrics::new()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Metrics endpoint
    let listener = metrics::bind(cfg.metrics_bind).await?;
    let metrics_server = metrics::serve(listener, metrics.clone(), shutdown_rx.clone());
    let metrics_handle = tokio::spawn(async move {
        if let Err(e) = metrics_server.await {
            error!("Metrics server failed: {:#}", e);
        }
    });

    // Clients
    let membership = Arc::new(
        KubernetesMembership::connect(cfg.node_selector.clone())
            .await
            .context("Failed creating Kubernetes client")?,
    );
    let api = CloudflareApi::new(
        cfg.api_base_url.clone(),
        Credentials {
            api_key: cfg.api_key.expose().to_string(),
            email: cfg.api_email.clone(),
            organization_id: cfg.organization_id.clone(),
        },
    )
    .context("Failed creating Cloudflare client")?;

    // Bootstrap
    let mut controller = Controller::new(
        membership.clone(),
        LoadBalancerClient::new(api),
        cfg.strategy(),
        metrics,
    );
    match controller.bootstrap().await {
        Ok(Outcome::Synchronized { origins }) => {
            if let Some(snapshot) = controller.snapshot() {
                info!(
                    "Load balancer {} ({:?}) initialized: monitor {:?}, pool {:?}, {} origins",
                    snapshot.load_balancer.name,
                    snapshot.load_balancer.id,
                    snapshot.monitor.id,
                    snapshot.pool.id,
                    origins
                );
            }
        }
        Ok(Outcome::Unimplemented(what)) => warn!("Bootstrap skipped {}: not implemented", what),
        Err(e) => {
            error!("Failed initializing load balancer: {}", e);
            return Err(e).context("Bootstrap failed");
        }
    }

    // Triggers
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let ticker_handle = tokio::spawn(run_ticker(
        cfg.interval(),
        StdRng::from_os_rng(),
        trigger_tx.clone(),
        shutdown_rx.clone(),
    ));

    let mut watch_handles = Vec::new();
    if cfg.watch_nodes {
        let (change_tx, change_rx) = mpsc::channel(64);
        let membership_for_watch = Arc::clone(&membership);
        watch_handles.push(tokio::spawn(async move {
            if let Err(e) = membership_for_watch.watch_changes(change_tx).await {
                error!("Node watch failed: {}", e);
            }
        }));
        watch_handles.push(tokio::spawn(debounce(
            change_rx,
            cfg.debounce(),
            trigger_tx.clone(),
        )));
    }
    drop(trigger_tx);

    // Reconciliation worker
    let mut worker = tokio::spawn(controller.run(trigger_rx, shutdown_rx));

    // Graceful Shutdown
    let worker_result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Waiting on running reconciliation to finish...");
            let _ = shutdown_tx.send(true);
            (&mut worker).await
        }
        result = &mut worker => {
            let _ = shutdown_tx.send(true);
            result
        }
    };

    ticker_handle.await.ok();
    for handle in watch_handles {
        handle.abort();
    }
    if let Err(e) = metrics_handle.await {
        error!("Metrics server task failed: {}", e);
    }

    worker_result
        .context("Reconciliation worker panicked")?
        .context("Reconciliation failed")?;
    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
