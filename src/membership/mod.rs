use crate::error::MembershipError;
use crate::types::Node;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod kubernetes;
pub use kubernetes::KubernetesMembership;

#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// List the nodes currently eligible for traffic.
    /// An empty cluster is an empty list, not an error.
    async fn list_healthy_nodes(&self) -> Result<Vec<Node>, MembershipError>;

    /// Watch the cluster and send a signal whenever the set of healthy
    /// nodes changes. Returns once the receiving side is gone.
    async fn watch_changes(&self, change_tx: mpsc::Sender<()>) -> Result<(), MembershipError>;
}
