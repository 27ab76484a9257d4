//! Load balancer API client.
//!
//! [`LoadBalancerApi`] is the raw request/response surface of the remote
//! service; [`LoadBalancerClient`] layers the get-or-create semantics the
//! controller relies on over any implementation of it.
//!
//! Every operation lists the existing resources and matches them by their
//! human readable name (or description, for monitors) before writing.  The
//! remote API does not accept client assigned ids, so this is what keeps the
//! operations idempotent across restarts and concurrent controllers.

use crate::error::{ApiError, Error};
use crate::types::{LoadBalancer, Monitor, Node, Origin, Pool, Zone};
use async_trait::async_trait;
use log::{debug, info};

pub mod http;
pub use http::CloudflareApi;

#[cfg(test)]
pub mod fake;

/// Maximum number of origins placed in a pool.
pub const MAX_ORIGINS: usize = 5;

const LOAD_BALANCER_DESCRIPTION: &str = "Created by lbsync";

#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, ApiError>;
    async fn create_monitor(&self, monitor: &Monitor) -> Result<Monitor, ApiError>;

    async fn list_pools(&self) -> Result<Vec<Pool>, ApiError>;
    async fn create_pool(&self, pool: &Pool) -> Result<Pool, ApiError>;
    async fn update_pool(&self, id: &str, pool: &Pool) -> Result<Pool, ApiError>;

    /// Zones whose name matches `name`.
    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>, ApiError>;

    async fn list_load_balancers(&self, zone_id: &str) -> Result<Vec<LoadBalancer>, ApiError>;
    async fn create_load_balancer(
        &self,
        zone_id: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ApiError>;
    async fn update_load_balancer(
        &self,
        zone_id: &str,
        id: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ApiError>;
}

/// Identity of the monitor checking `pool_name` in `zone`.
pub fn monitor_description(pool_name: &str, zone: &str, path: &str) -> String {
    format!("{}.{}{}", pool_name, zone, path)
}

pub fn load_balancer_name(lb_name: &str, zone: &str) -> String {
    format!("{}.{}", lb_name, zone)
}

/// One enabled origin per node, in order, truncated to [`MAX_ORIGINS`].
pub fn origins_from_nodes(nodes: &[Node]) -> Vec<Origin> {
    nodes.iter().take(MAX_ORIGINS).map(Origin::from).collect()
}

/// Carry per-origin settings (weights, headers) over to the origin of the
/// same name in the new list.
fn keep_origin_settings(previous: &[Origin], mut origins: Vec<Origin>) -> Vec<Origin> {
    for origin in &mut origins {
        if let Some(old) = previous.iter().find(|o| o.name == origin.name) {
            origin.extra = old.extra.clone();
        }
    }
    origins
}

pub struct LoadBalancerClient {
    api: Box<dyn LoadBalancerApi>,
}

impl LoadBalancerClient {
    pub fn new(api: impl LoadBalancerApi + 'static) -> Self {
        Self { api: Box::new(api) }
    }

    /// Return the monitor for this pool, creating it when absent.
    ///
    /// An existing monitor is returned as stored remotely, even when its
    /// settings differ from the creation policy.
    pub async fn get_or_create_monitor(
        &self,
        pool_name: &str,
        zone: &str,
        path: &str,
    ) -> Result<Monitor, Error> {
        let description = monitor_description(pool_name, zone, path);

        let monitors = self.api.list_monitors().await.map_err(Error::MonitorLookup)?;
        debug!("Retrieved {} load balancer monitors", monitors.len());

        if let Some(existing) = monitors.into_iter().find(|m| m.description == description) {
            debug!("Found monitor {:?} for {}", existing.id, description);
            return Ok(existing);
        }

        let monitor = self
            .api
            .create_monitor(&Monitor::https(description.clone(), path))
            .await
            .map_err(|cause| Error::MonitorCreate {
                description: description.clone(),
                cause,
            })?;
        info!("Created monitor {:?} for {}", monitor.id, description);
        Ok(monitor)
    }

    /// Create the pool, or overwrite its origins and monitor when it exists.
    pub async fn get_or_create_pool(
        &self,
        pool_name: &str,
        nodes: &[Node],
        monitor: &Monitor,
    ) -> Result<Pool, Error> {
        let pools = self.api.list_pools().await.map_err(Error::PoolLookup)?;
        debug!("Retrieved {} load balancer pools", pools.len());
        let existing = pools.into_iter().find(|p| p.name == pool_name);

        let origins = origins_from_nodes(nodes);
        debug!("Origins for pool {} from {} nodes: {:?}", pool_name, nodes.len(), origins);

        match existing {
            None => {
                let desired = Pool {
                    id: None,
                    name: pool_name.to_string(),
                    origins,
                    enabled: true,
                    monitor_id: monitor.id.clone(),
                    extra: Default::default(),
                };
                let pool = self
                    .api
                    .create_pool(&desired)
                    .await
                    .map_err(|cause| Error::PoolCreate {
                        name: pool_name.to_string(),
                        cause,
                    })?;
                info!(
                    "Created pool {} ({:?}) with {} origins",
                    pool_name,
                    pool.id,
                    pool.origins.len()
                );
                Ok(pool)
            }
            Some(mut pool) => {
                let update_error = |cause: ApiError| Error::PoolUpdate {
                    name: pool_name.to_string(),
                    cause,
                };
                let id = pool
                    .id
                    .clone()
                    .ok_or_else(|| update_error(ApiError::MissingId(pool_name.to_string())))?;
                pool.origins = keep_origin_settings(&pool.origins, origins);
                pool.monitor_id = monitor.id.clone();

                let pool = self
                    .api
                    .update_pool(&id, &pool)
                    .await
                    .map_err(update_error)?;
                info!(
                    "Updated pool {} ({}) with {} origins",
                    pool_name,
                    id,
                    pool.origins.len()
                );
                Ok(pool)
            }
        }
    }

    /// Create the load balancer for `pool`, or make sure an existing one
    /// includes it in its default pools. Pools are only ever added.
    pub async fn get_or_create_load_balancer(
        &self,
        lb_name: &str,
        zone: &str,
        pool: &Pool,
    ) -> Result<LoadBalancer, Error> {
        let zone_id = self.zone_id(zone).await?;
        let name = load_balancer_name(lb_name, zone);

        let load_balancers =
            self.api
                .list_load_balancers(&zone_id)
                .await
                .map_err(|cause| Error::LoadBalancerLookup {
                    zone_id: zone_id.clone(),
                    cause,
                })?;
        debug!(
            "Retrieved {} load balancers for zone {}",
            load_balancers.len(),
            zone_id
        );
        let existing = load_balancers.into_iter().find(|lb| lb.name == name);

        match existing {
            None => {
                let pool_id = pool.id.clone().ok_or_else(|| Error::LoadBalancerCreate {
                    name: name.clone(),
                    cause: ApiError::MissingId(pool.name.clone()),
                })?;
                let desired = LoadBalancer {
                    id: None,
                    name: name.clone(),
                    description: LOAD_BALANCER_DESCRIPTION.into(),
                    fallback_pool: pool_id.clone(),
                    default_pools: vec![pool_id],
                    proxied: true,
                    extra: Default::default(),
                };
                let load_balancer = self
                    .api
                    .create_load_balancer(&zone_id, &desired)
                    .await
                    .map_err(|cause| Error::LoadBalancerCreate {
                        name: name.clone(),
                        cause,
                    })?;
                info!("Created load balancer {} in zone {}", name, zone);
                Ok(load_balancer)
            }
            Some(mut load_balancer) => {
                let update_error = |cause: ApiError| Error::LoadBalancerUpdate {
                    name: name.clone(),
                    cause,
                };
                let pool_id = pool
                    .id
                    .clone()
                    .ok_or_else(|| update_error(ApiError::MissingId(pool.name.clone())))?;
                if load_balancer.default_pools.contains(&pool_id) {
                    debug!("Load balancer {} already routes to pool {}", name, pool_id);
                    return Ok(load_balancer);
                }

                let id = load_balancer
                    .id
                    .clone()
                    .ok_or_else(|| update_error(ApiError::MissingId(name.clone())))?;
                load_balancer.default_pools.push(pool_id.clone());
                let load_balancer = self
                    .api
                    .update_load_balancer(&zone_id, &id, &load_balancer)
                    .await
                    .map_err(update_error)?;
                info!("Added pool {} to load balancer {}", pool_id, name);
                Ok(load_balancer)
            }
        }
    }

    async fn zone_id(&self, zone: &str) -> Result<String, Error> {
        let zones = self
            .api
            .list_zones(zone)
            .await
            .map_err(|cause| Error::ZoneLookup {
                zone: zone.to_string(),
                cause,
            })?;
        let zone_id = zones
            .into_iter()
            .find(|z| z.name == zone)
            .map(|z| z.id)
            .ok_or_else(|| Error::ZoneNotFound {
                zone: zone.to_string(),
            })?;
        debug!("Zone id for zone {} is {}", zone, zone_id);
        Ok(zone_id)
    }
}
