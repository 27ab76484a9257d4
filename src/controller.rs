//! Reconciliation controller.
//!
//! The controller owns the only state that survives between cycles: the
//! monitor, pool and load balancer established at bootstrap, plus the node
//! list last applied.  It is driven by a single worker ([`Controller::run`])
//! which receives [`Trigger`]s over a channel, so cycles never overlap and
//! nothing else mutates that state.
//!
//! Bootstrap creates or finds the monitor, then the pool, then the load
//! balancer.  Afterwards every cycle only refreshes the pool's origins from
//! the current membership; the monitor and load balancer are not revisited.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

use crate::cloudflare::LoadBalancerClient;
use crate::error::Error;
use crate::membership::MembershipSource;
use crate::metrics::Metrics;
use crate::types::{LoadBalancer, Monitor, Node, Pool, Trigger};

/// Names of the remote resources managed in pool mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTarget {
    pub pool_name: String,
    pub lb_name: String,
    pub zone: String,
    pub monitor_path: String,
}

/// How membership is published, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Pool(PoolTarget),
    /// One DNS record per node. Not built yet.
    Dns { zone: String },
}

/// Result of a bootstrap or reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Synchronized { origins: usize },
    Unimplemented(&'static str),
}

#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub monitor: Monitor,
    pub pool: Pool,
    pub load_balancer: LoadBalancer,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Established {
    Pool(PoolSnapshot),
    Dns,
}

pub struct Controller {
    membership: Arc<dyn MembershipSource>,
    client: LoadBalancerClient,
    strategy: Strategy,
    metrics: Metrics,
    state: Option<Established>,
}

impl Controller {
    pub fn new(
        membership: Arc<dyn MembershipSource>,
        client: LoadBalancerClient,
        strategy: Strategy,
        metrics: Metrics,
    ) -> Self {
        Self {
            membership,
            client,
            strategy,
            metrics,
            state: None,
        }
    }

    pub fn snapshot(&self) -> Option<&PoolSnapshot> {
        match &self.state {
            Some(Established::Pool(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    /// Establish the remote configuration. Any error here must stop the
    /// process; a partial configuration is never kept.
    pub async fn bootstrap(&mut self) -> Result<Outcome, Error> {
        let target = match &self.strategy {
            Strategy::Pool(target) => target.clone(),
            Strategy::Dns { zone } => {
                warn!("DNS mode for zone {} is not implemented", zone);
                self.state = Some(Established::Dns);
                return Ok(Outcome::Unimplemented("dns record reconciliation"));
            }
        };

        let nodes = self.fetch_nodes().await?;

        let monitor = self
            .client
            .get_or_create_monitor(&target.pool_name, &target.zone, &target.monitor_path)
            .await?;

        let pool = self.sync_pool(&target.pool_name, &nodes, &monitor).await?;

        let load_balancer = self
            .client
            .get_or_create_load_balancer(&target.lb_name, &target.zone, &pool)
            .await?;
        debug!("Load balancer object: {:?}", load_balancer);

        let origins = pool.origins.len();
        info!(
            "Bootstrapped load balancer {} with pool {} ({} origins)",
            load_balancer.name, pool.name, origins
        );
        self.state = Some(Established::Pool(PoolSnapshot {
            monitor,
            pool,
            load_balancer,
            nodes,
        }));
        Ok(Outcome::Synchronized { origins })
    }

    /// One steady-state cycle: re-read membership and overwrite the pool's
    /// origins. On failure the cached snapshot is left untouched.
    pub async fn reconcile(&mut self) -> Result<Outcome, Error> {
        let (pool_name, monitor, previous) = match &self.state {
            None => return Err(Error::NotBootstrapped),
            Some(Established::Dns) => {
                return Ok(Outcome::Unimplemented("dns record reconciliation"))
            }
            Some(Established::Pool(snapshot)) => (
                snapshot.pool.name.clone(),
                snapshot.monitor.clone(),
                snapshot.nodes.clone(),
            ),
        };

        let nodes = self.fetch_nodes().await?;
        if nodes == previous {
            debug!("Membership unchanged, {} nodes", nodes.len());
        } else {
            info!(
                "Membership changed from {} to {} nodes",
                previous.len(),
                nodes.len()
            );
        }

        let pool = self.sync_pool(&pool_name, &nodes, &monitor).await?;
        let origins = pool.origins.len();

        if let Some(Established::Pool(snapshot)) = &mut self.state {
            snapshot.pool = pool;
            snapshot.nodes = nodes;
        }
        Ok(Outcome::Synchronized { origins })
    }

    /// Serve triggers until shutdown is signalled or the trigger channel
    /// closes. A cycle in progress always completes first.
    ///
    /// Only fatal errors end the loop early; everything else is logged and
    /// retried on the next trigger.
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<Trigger>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Error> {
        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            debug!("Reconciling on {:?}", trigger);
            match self.reconcile().await {
                Ok(Outcome::Synchronized { origins }) => {
                    info!("Pool synchronized with {} origins ({:?})", origins, trigger)
                }
                Ok(Outcome::Unimplemented(what)) => warn!("Skipping {}: not implemented", what),
                Err(e) if e.is_fatal() => {
                    error!("Reconciliation failed fatally: {}", e);
                    return Err(e);
                }
                Err(e) => warn!("Reconciliation failed, retrying next cycle: {}", e),
            }
        }
        info!("Reconciliation worker stopped");
        Ok(())
    }

    async fn fetch_nodes(&self) -> Result<Vec<Node>, Error> {
        let nodes = self
            .membership
            .list_healthy_nodes()
            .await
            .map_err(Error::MembershipQuery)?;
        debug!("Healthy nodes: {:?}", nodes);
        Ok(nodes)
    }

    async fn sync_pool(
        &self,
        pool_name: &str,
        nodes: &[Node],
        monitor: &Monitor,
    ) -> Result<Pool, Error> {
        let result = self.client.get_or_create_pool(pool_name, nodes, monitor).await;
        self.metrics.record_pool(result.is_ok());
        result
    }
}
