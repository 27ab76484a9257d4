use super::MembershipSource;
use crate::error::MembershipError;
use crate::types::Node;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use k8s_openapi::api::core::v1::Node as KubeNode;
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

pub struct KubernetesMembership {
    client: Client,
    node_selector: Option<String>,
}

impl KubernetesMembership {
    /// Connect using `KUBECONFIG` when set, in-cluster credentials otherwise.
    pub async fn connect(node_selector: Option<String>) -> Result<Self, MembershipError> {
        let client = Client::try_default().await.map_err(|e| {
            MembershipError::Unavailable(format!("no usable cluster configuration: {}", e))
        })?;
        Ok(Self::new(client, node_selector))
    }

    pub fn new(client: Client, node_selector: Option<String>) -> Self {
        Self {
            client,
            node_selector,
        }
    }

    fn api(&self) -> Api<KubeNode> {
        Api::all(self.client.clone())
    }

    fn list_params(&self) -> ListParams {
        match &self.node_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        }
    }

    fn watcher_config(&self) -> watcher::Config {
        match &self.node_selector {
            Some(selector) => watcher::Config::default().labels(selector),
            None => watcher::Config::default(),
        }
    }
}

#[async_trait]
impl MembershipSource for KubernetesMembership {
    async fn list_healthy_nodes(&self) -> Result<Vec<Node>, MembershipError> {
        let list = self.api().list(&self.list_params()).await?;
        let nodes: Vec<Node> = list.items.iter().filter_map(healthy_node).collect();
        debug!(
            "Retrieved {} kubernetes nodes, {} healthy: {:?}",
            list.items.len(),
            nodes.len(),
            nodes
        );
        Ok(nodes)
    }

    async fn watch_changes(&self, change_tx: mpsc::Sender<()>) -> Result<(), MembershipError> {
        let mut tracker = NodeTracker::default();
        loop {
            info!("Watching kubernetes nodes for changes...");
            let mut stream = watcher::watcher(self.api(), self.watcher_config())
                .default_backoff()
                .boxed();

            while let Some(event) = stream.next().await {
                let changed = match event {
                    Ok(Event::Apply(node)) => tracker.apply(&node),
                    Ok(Event::Delete(node)) => tracker.delete(&node),
                    Ok(Event::Init) => {
                        tracker.begin_resync();
                        false
                    }
                    Ok(Event::InitApply(node)) => {
                        tracker.resync(&node);
                        false
                    }
                    Ok(Event::InitDone) => tracker.finish_resync(),
                    Err(e) => {
                        warn!("Error in kubernetes node watch: {}", e);
                        false
                    }
                };

                if changed {
                    debug!("Healthy node set changed, {} nodes", tracker.len());
                    if change_tx.send(()).await.is_err() {
                        info!("Node change channel closed, stopping watch");
                        return Ok(());
                    }
                }
            }

            warn!("Kubernetes node watch ended. Restarting in 2s...");
            sleep(Duration::from_secs(2)).await;
        }
    }
}

/// Derive a [`Node`] from a kubernetes node that is `Ready` and has an
/// external address.
pub fn healthy_node(node: &KubeNode) -> Option<Node> {
    let name = node.metadata.name.as_ref()?;
    let status = node.status.as_ref()?;

    let ready = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    if !ready {
        debug!("Skipping node {}: not ready", name);
        return None;
    }

    let address = status
        .addresses
        .iter()
        .flatten()
        .find(|a| a.type_ == "ExternalIP" && !a.address.is_empty());
    match address {
        Some(a) => Some(Node::new(name.clone(), a.address.clone())),
        None => {
            debug!("Skipping node {}: no external address", name);
            None
        }
    }
}

/// Tracks the derived node set seen by a watch so that status heartbeats
/// which don't change readiness or address don't trigger reconciliation.
#[derive(Debug, Default)]
pub struct NodeTracker {
    nodes: HashMap<String, Node>,
    pending: Option<HashMap<String, Node>>,
    synced: bool,
}

impl NodeTracker {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn apply(&mut self, node: &KubeNode) -> bool {
        let Some(name) = node.metadata.name.clone() else {
            return false;
        };
        match healthy_node(node) {
            Some(derived) => self.nodes.insert(name, derived.clone()) != Some(derived),
            None => self.nodes.remove(&name).is_some(),
        }
    }

    pub fn delete(&mut self, node: &KubeNode) -> bool {
        node.metadata
            .name
            .as_ref()
            .is_some_and(|name| self.nodes.remove(name).is_some())
    }

    pub fn begin_resync(&mut self) {
        self.pending = Some(HashMap::new());
    }

    pub fn resync(&mut self, node: &KubeNode) {
        let pending = self.pending.get_or_insert_with(HashMap::new);
        if let (Some(name), Some(derived)) = (node.metadata.name.clone(), healthy_node(node)) {
            pending.insert(name, derived);
        }
    }

    /// Swap in the relisted set; reports whether it differs from before.
    /// The first listing only seeds the tracker, bootstrap already used it.
    pub fn finish_resync(&mut self) -> bool {
        match self.pending.take() {
            Some(fresh) => {
                let changed = self.synced && fresh != self.nodes;
                self.nodes = fresh;
                self.synced = true;
                changed
            }
            None => false,
        }
    }
}
