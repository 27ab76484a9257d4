//! Data structures shared between the membership source, the load
//! balancer client and the controller.
//!
//! The remote resources are serialised using [`serde`](https://serde.rs/)
//! with the field names the Cloudflare v4 API expects, so the same values
//! travel straight from a listing into an update request.  Updates replace
//! the whole remote object, so pools, origins and load balancers keep every
//! field the controller does not manage in `extra` and send it back as read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A cluster node eligible to receive traffic.
///
/// Produced fresh on every reconciliation cycle by the membership source.
/// `name` is the node name and `external_address` the address the load
/// balancer should route to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub external_address: String,
}

impl Node {
    pub fn new(name: impl Into<String>, external_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_address: external_address.into(),
        }
    }
}

/// One backend target inside a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub enabled: bool,
    /// Settings such as `weight` or `header`, kept as listed.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&Node> for Origin {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            address: node.external_address.clone(),
            enabled: true,
            extra: Map::new(),
        }
    }
}

/// A health check definition attached to a pool.
///
/// Monitors have no name in the remote API; the description is used as the
/// identity key instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub protocol: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub timeout: u32,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub interval: u32,
    #[serde(default)]
    pub expected_codes: String,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub allow_insecure: bool,
}

impl Monitor {
    /// The policy every monitor is created with.
    pub fn https(description: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            protocol: "https".into(),
            method: "GET".into(),
            path: path.into(),
            timeout: 5,
            retries: 2,
            interval: 60,
            expected_codes: "200".into(),
            follow_redirects: false,
            allow_insecure: true,
        }
    }
}

/// A named, ordered collection of origins checked by one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub origins: Vec<Origin>,
    #[serde(default)]
    pub enabled: bool,
    /// Id of the monitor checking this pool's origins.
    #[serde(rename = "monitor", default, skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A routing object in a zone, directing traffic to one or more pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fallback_pool: String,
    #[serde(default)]
    pub default_pools: Vec<String>,
    #[serde(default)]
    pub proxied: bool,
    /// Steering, affinity and region settings owned by other actors.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// What the reconciliation worker is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The jittered interval elapsed.
    Tick,
    /// Cluster membership changed and the burst of events has settled.
    NodesChanged,
}
