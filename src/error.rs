//! Error types for the reconciliation path.

use thiserror::Error;

/// Failure talking to the remote load balancer API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api returned {status}: {}", .messages.join("; "))]
    Api { status: u16, messages: Vec<String> },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid credential header: {0}")]
    Credentials(String),
    #[error("{0} has no id")]
    MissingId(String),
}

/// Failure talking to the cluster.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("{0}")]
    Unavailable(String),
}

/// A failed reconciliation step, naming the operation and resource.
///
/// The message already carries the underlying cause, so no variant
/// exposes it again through `source()`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("querying healthy nodes failed: {0}")]
    MembershipQuery(MembershipError),

    #[error("listing monitors failed: {0}")]
    MonitorLookup(ApiError),
    #[error("creating monitor {description} failed: {cause}")]
    MonitorCreate {
        description: String,
        cause: ApiError,
    },

    #[error("listing pools failed: {0}")]
    PoolLookup(ApiError),
    #[error("creating pool {name} failed: {cause}")]
    PoolCreate {
        name: String,
        cause: ApiError,
    },
    #[error("updating pool {name} failed: {cause}")]
    PoolUpdate {
        name: String,
        cause: ApiError,
    },

    #[error("retrieving zone {zone} failed: {cause}")]
    ZoneLookup {
        zone: String,
        cause: ApiError,
    },
    #[error("zone {zone} not found")]
    ZoneNotFound { zone: String },

    #[error("listing load balancers for zone {zone_id} failed: {cause}")]
    LoadBalancerLookup {
        zone_id: String,
        cause: ApiError,
    },
    #[error("creating load balancer {name} failed: {cause}")]
    LoadBalancerCreate {
        name: String,
        cause: ApiError,
    },
    #[error("updating load balancer {name} failed: {cause}")]
    LoadBalancerUpdate {
        name: String,
        cause: ApiError,
    },

    #[error("reconciliation requested before bootstrap completed")]
    NotBootstrapped,
}

impl Error {
    /// Errors no later cycle can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ZoneNotFound { .. } | Error::NotBootstrapped)
    }
}
