//! In-memory [`LoadBalancerApi`] recording every call.

use super::LoadBalancerApi;
use crate::error::ApiError;
use crate::types::{LoadBalancer, Monitor, Pool, Zone};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListMonitors,
    CreateMonitor(String),
    ListPools,
    CreatePool(String),
    UpdatePool(String),
    ListZones(String),
    ListLoadBalancers(String),
    CreateLoadBalancer(String),
    UpdateLoadBalancer(String),
}

impl Call {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Call::CreateMonitor(_)
                | Call::CreatePool(_)
                | Call::UpdatePool(_)
                | Call::CreateLoadBalancer(_)
                | Call::UpdateLoadBalancer(_)
        )
    }
}

#[derive(Default)]
struct State {
    monitors: Vec<Monitor>,
    pools: Vec<Pool>,
    zones: Vec<Zone>,
    load_balancers: HashMap<String, Vec<LoadBalancer>>,
    calls: Vec<Call>,
    failing: HashSet<&'static str>,
    next_id: u32,
}

impl State {
    fn id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", kind, self.next_id)
    }

    fn check(&mut self, operation: &'static str, call: Call) -> Result<(), ApiError> {
        self.calls.push(call);
        if self.failing.contains(operation) {
            return Err(ApiError::Api {
                status: 500,
                messages: vec![format!("{} unavailable", operation)],
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<State>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn pool(&self, name: &str) -> Option<Pool> {
        let state = self.state.lock().unwrap();
        state.pools.iter().find(|p| p.name == name).cloned()
    }

    pub fn monitors(&self) -> Vec<Monitor> {
        self.state.lock().unwrap().monitors.clone()
    }

    pub fn load_balancers(&self, zone_id: &str) -> Vec<LoadBalancer> {
        let state = self.state.lock().unwrap();
        state.load_balancers.get(zone_id).cloned().unwrap_or_default()
    }

    pub fn seed_zone(&self, id: &str, name: &str) {
        self.state.lock().unwrap().zones.push(Zone {
            id: id.into(),
            name: name.into(),
        });
    }

    pub fn seed_monitor(&self, mut monitor: Monitor) -> Monitor {
        let mut state = self.state.lock().unwrap();
        monitor.id = Some(state.id("monitor"));
        state.monitors.push(monitor.clone());
        monitor
    }

    pub fn seed_pool(&self, name: &str) -> Pool {
        let mut state = self.state.lock().unwrap();
        let pool = Pool {
            id: Some(format!("{}-id", name)),
            name: name.into(),
            origins: Vec::new(),
            enabled: true,
            monitor_id: None,
            extra: Default::default(),
        };
        state.pools.push(pool.clone());
        pool
    }

    /// Store `pool` exactly as given, as if another actor had created it.
    pub fn seed_pool_as(&self, pool: Pool) {
        self.state.lock().unwrap().pools.push(pool);
    }

    pub fn seed_load_balancer(&self, zone_id: &str, name: &str, default_pools: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        let id = state.id("lb");
        let fallback_pool = default_pools.first().cloned().unwrap_or_default();
        state
            .load_balancers
            .entry(zone_id.into())
            .or_default()
            .push(LoadBalancer {
                id: Some(id),
                name: name.into(),
                description: String::new(),
                fallback_pool,
                default_pools,
                proxied: true,
                extra: Default::default(),
            });
    }
}

#[async_trait]
impl LoadBalancerApi for FakeApi {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_monitors", Call::ListMonitors)?;
        Ok(state.monitors.clone())
    }

    async fn create_monitor(&self, monitor: &Monitor) -> Result<Monitor, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check(
            "create_monitor",
            Call::CreateMonitor(monitor.description.clone()),
        )?;
        let mut created = monitor.clone();
        created.id = Some(state.id("monitor"));
        state.monitors.push(created.clone());
        Ok(created)
    }

    async fn list_pools(&self) -> Result<Vec<Pool>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_pools", Call::ListPools)?;
        Ok(state.pools.clone())
    }

    async fn create_pool(&self, pool: &Pool) -> Result<Pool, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check("create_pool", Call::CreatePool(pool.name.clone()))?;
        let mut created = pool.clone();
        created.id = Some(state.id("pool"));
        state.pools.push(created.clone());
        Ok(created)
    }

    async fn update_pool(&self, id: &str, pool: &Pool) -> Result<Pool, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check("update_pool", Call::UpdatePool(pool.name.clone()))?;
        let stored = state
            .pools
            .iter_mut()
            .find(|p| p.id.as_deref() == Some(id))
            .ok_or_else(|| ApiError::Api {
                status: 404,
                messages: vec![format!("pool {} not found", id)],
            })?;
        *stored = pool.clone();
        Ok(stored.clone())
    }

    async fn list_zones(&self, name: &str) -> Result<Vec<Zone>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_zones", Call::ListZones(name.into()))?;
        Ok(state.zones.iter().filter(|z| z.name == name).cloned().collect())
    }

    async fn list_load_balancers(&self, zone_id: &str) -> Result<Vec<LoadBalancer>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_load_balancers", Call::ListLoadBalancers(zone_id.into()))?;
        Ok(state.load_balancers.get(zone_id).cloned().unwrap_or_default())
    }

    async fn create_load_balancer(
        &self,
        zone_id: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check(
            "create_load_balancer",
            Call::CreateLoadBalancer(load_balancer.name.clone()),
        )?;
        let mut created = load_balancer.clone();
        created.id = Some(state.id("lb"));
        state
            .load_balancers
            .entry(zone_id.into())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_load_balancer(
        &self,
        zone_id: &str,
        id: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.check(
            "update_load_balancer",
            Call::UpdateLoadBalancer(load_balancer.name.clone()),
        )?;
        let stored = state
            .load_balancers
            .get_mut(zone_id)
            .and_then(|lbs| lbs.iter_mut().find(|lb| lb.id.as_deref() == Some(id)))
            .ok_or_else(|| ApiError::Api {
                status: 404,
                messages: vec![format!("load balancer {} not found", id)],
            })?;
        *stored = load_balancer.clone();
        Ok(stored.clone())
    }
}
