//! Dispatcher lifecycle orchestration.
//!
//! The [`Dispatcher`] is the only component that changes the topology. It
//! is responsible for:
//! - Spawning workers and registering them on the ring
//! - Migrating records when a worker joins or leaves
//! - Killing workers on removal and on shutdown
//!
//! Entity traffic goes through the [`Routers`] it exposes.

mod launcher;
mod migration;
mod node_registry;

pub use launcher::{ProcessLauncher, WorkerLauncher, WorkerProcess};
pub use migration::{Holdings, Migrator};
pub use node_registry::NodeRegistry;

use crate::config::{ConfigError, DispatcherConfig};
use crate::routing::Routers;
use crate::rpc::client::NodeClients;
use crate::types::{DispatchError, DispatchResult, NodeStatus};
use chash_proto::{MigrationSummary, NodeCreated, NodeDeleted, NodeInfo};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A worker the dispatcher started. The process handle never leaves this
/// module.
struct ManagedWorker {
    info: NodeInfo,
    status: NodeStatus,
    process: Option<Box<dyn WorkerProcess>>,
}

/// The dispatcher's lifecycle service.
///
/// # Thread Safety
///
/// All methods take `&self`. Create, delete and rebalance hold the topology
/// mutex for their whole run, so at most one of them is in flight; entity
/// routing continues meanwhile against the registry's read lock.
pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    clients: Arc<NodeClients>,
    routers: Routers,
    migrator: Migrator,
    launcher: Arc<dyn WorkerLauncher>,
    workers: Mutex<HashMap<String, ManagedWorker>>,
    topology: Mutex<()>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher that launches workers as child processes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        Self::with_launcher(config, Arc::new(ProcessLauncher))
    }

    /// Create a dispatcher with a custom worker launcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn with_launcher(
        config: DispatcherConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(NodeRegistry::new(config.virtual_nodes));
        let clients = Arc::new(NodeClients::new(
            config.node_host.clone(),
            config.client_config(),
        ));
        Ok(Self {
            routers: Routers::new(Arc::clone(&registry), Arc::clone(&clients), config.max_fanout),
            migrator: Migrator::new(
                Arc::clone(&registry),
                Arc::clone(&clients),
                config.delete_retries,
            ),
            registry,
            clients,
            launcher,
            workers: Mutex::new(HashMap::new()),
            topology: Mutex::new(()),
            config,
        })
    }

    /// The registry routing decisions are made against.
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Per-kind entity routers.
    pub fn routers(&self) -> &Routers {
        &self.routers
    }

    /// The configuration this dispatcher runs with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Spawn a worker on `preferred_port`, register it, and move onto it
    /// every record it now owns.
    ///
    /// Returns once migration has finished. Migration failures do not fail
    /// the call; they are reported in the message.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ExecutableNotFound`] / [`DispatchError::NoExecutable`]
    ///   if no worker binary can be found.
    /// - [`DispatchError::PortInUse`] if a registered node already listens on
    ///   `preferred_port`.
    /// - [`DispatchError::SpawnFailed`] if the process cannot start.
    pub async fn create_node(
        &self,
        preferred_port: u16,
        node_path: Option<&str>,
    ) -> DispatchResult<NodeCreated> {
        let _topology = self.topology.lock().await;

        let executable = self.resolve_executable(node_path)?;
        if let Some(holder) = self
            .registry
            .all_nodes()
            .await
            .into_iter()
            .find(|n| n.port == preferred_port)
        {
            warn!("Port {} is already served by node {}", preferred_port, holder);
            return Err(DispatchError::PortInUse {
                port: preferred_port,
                node: holder.node_id,
            });
        }
        let node_id = Uuid::new_v4().to_string();
        info!(
            "Starting node {} on port {} from {}",
            node_id,
            preferred_port,
            executable.display()
        );

        let process = self
            .launcher
            .launch(&executable, preferred_port)
            .await
            .map_err(|e| {
                error!("Failed to start worker {}: {}", executable.display(), e);
                DispatchError::SpawnFailed(e.to_string())
            })?;
        info!("Node {} started (pid {:?})", node_id, process.pid());

        let node = NodeInfo::new(node_id.clone(), preferred_port);
        {
            let mut workers = self.workers.lock().await;
            workers.retain(|_, w| w.status != NodeStatus::Terminated);
            workers.insert(
                node_id.clone(),
                ManagedWorker {
                    info: node.clone(),
                    status: NodeStatus::Provisioning,
                    process: Some(process),
                },
            );
        }

        self.registry.add_node(node.clone()).await;
        self.set_status(&node_id, NodeStatus::Active).await;

        let mut summary = MigrationSummary::default();
        for source in self.registry.all_nodes().await {
            if source.node_id == node_id {
                continue;
            }
            summary.absorb(self.migrator.rebalance_from(&source, Some(&node_id)).await);
        }

        let message = describe("Node created", &summary);
        info!("Node {} ready: {}", node, message);
        Ok(NodeCreated {
            node_id,
            port: preferred_port,
            migrated: summary.migrated,
            message,
        })
    }

    /// Move a worker's records to their new owners and kill it.
    ///
    /// The worker is listed before it leaves the ring; if that listing fails
    /// the node stays registered and the call fails, so nothing is lost.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NodeNotFound`] if `node_id` is not registered.
    /// - Any error from listing the node's records.
    pub async fn delete_node(&self, node_id: &str) -> DispatchResult<NodeDeleted> {
        let _topology = self.topology.lock().await;

        let node = self
            .registry
            .try_get_node(node_id)
            .await
            .ok_or_else(|| DispatchError::NodeNotFound(node_id.to_string()))?;

        let holdings = self.migrator.holdings(&node).await.map_err(|e| {
            warn!("Cannot drain node {}: {}", node, e);
            e
        })?;
        info!("Draining node {} ({} records)", node, holdings.len());

        self.set_status(node_id, NodeStatus::Draining).await;
        self.registry.remove_node(node_id).await;

        let summary = self.migrator.rehome(&node, holdings).await;

        self.terminate(node_id).await;
        self.clients.forget(node_id).await;

        let message = describe("Node deleted", &summary);
        info!("Node {} removed: {}", node, message);
        Ok(NodeDeleted {
            node_id: node_id.to_string(),
            migrated: summary.migrated,
            message,
        })
    }

    /// Move every record that is not on its ring owner.
    ///
    /// Resumes migrations cut short by a failure and clears stale copies
    /// left by failed source deletes.
    pub async fn rebalance(&self) -> DispatchResult<MigrationSummary> {
        let _topology = self.topology.lock().await;

        let nodes = self.registry.all_nodes().await;
        if nodes.is_empty() {
            return Err(DispatchError::EmptyRing);
        }

        let mut summary = MigrationSummary::default();
        for source in &nodes {
            summary.absorb(self.migrator.rebalance_from(source, None).await);
        }
        info!(
            "Rebalanced {} nodes: {} moved, {} stale, {} aborted",
            nodes.len(),
            summary.migrated,
            summary.stale,
            summary.aborted.len()
        );
        Ok(summary)
    }

    /// Kill every worker and empty the registry. Returns a status message.
    ///
    /// Kill failures are logged and the loop continues.
    pub async fn shutdown(&self, requester_id: &str) -> String {
        info!("Shutdown requested by {}", requester_id);

        let nodes = self.registry.all_nodes().await;
        for node in &nodes {
            self.set_status(&node.node_id, NodeStatus::Draining).await;
            self.registry.remove_node(&node.node_id).await;
            self.terminate(&node.node_id).await;
            self.clients.forget(&node.node_id).await;
        }

        format!("Shutdown initiated; {} nodes terminated", nodes.len())
    }

    /// Snapshot of the registered workers.
    pub async fn list_nodes(&self) -> Vec<NodeInfo> {
        self.registry.all_nodes().await
    }

    /// Lifecycle status of a worker this dispatcher started. Terminated
    /// workers are forgotten when the next node is created.
    pub async fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.workers.lock().await.get(node_id).map(|w| w.status)
    }

    fn resolve_executable(&self, node_path: Option<&str>) -> DispatchResult<PathBuf> {
        let path = match node_path.filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => self
                .config
                .default_node_path
                .clone()
                .ok_or(DispatchError::NoExecutable)?,
        };
        if !path.is_file() {
            return Err(DispatchError::ExecutableNotFound(
                path.display().to_string(),
            ));
        }
        Ok(path)
    }

    async fn set_status(&self, node_id: &str, status: NodeStatus) {
        if let Some(worker) = self.workers.lock().await.get_mut(node_id) {
            worker.status = status;
        }
    }

    /// Best-effort kill. The worker table lock is not held while killing.
    async fn terminate(&self, node_id: &str) {
        let taken = {
            let mut workers = self.workers.lock().await;
            workers.get_mut(node_id).map(|worker| {
                worker.status = NodeStatus::Terminated;
                (worker.info.clone(), worker.process.take())
            })
        };

        match taken {
            Some((node, Some(mut process))) => match process.kill().await {
                Ok(()) => info!("Killed node {}", node),
                Err(e) => warn!("Failed to kill node {}: {}", node, e),
            },
            Some((node, None)) => warn!("Node {} has no running process", node),
            None => warn!("Node {} was not started by this dispatcher", node_id),
        }
    }
}

fn describe(action: &str, summary: &MigrationSummary) -> String {
    let mut message = format!("{}; migrated {} records", action, summary.migrated);
    if summary.stale > 0 {
        message.push_str(&format!(
            ", {} stale copies left for rebalance",
            summary.stale
        ));
    }
    for (node, reason) in &summary.aborted {
        message.push_str(&format!("; migration from {} aborted: {}", node, reason));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_complete() {
        let summary = MigrationSummary {
            migrated: 4,
            ..Default::default()
        };
        assert_eq!(
            describe("Node created", &summary),
            "Node created; migrated 4 records"
        );
    }

    #[test]
    fn test_describe_partial() {
        let summary = MigrationSummary {
            migrated: 1,
            stale: 2,
            aborted: vec![("n1".into(), "connection refused".into())],
        };
        let message = describe("Node deleted", &summary);
        assert!(message.contains("2 stale"));
        assert!(message.contains("migration from n1 aborted: connection refused"));
    }

    #[tokio::test]
    async fn test_create_node_without_executable() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        assert!(matches!(
            dispatcher.create_node(5001, None).await,
            Err(DispatchError::NoExecutable)
        ));
        assert!(matches!(
            dispatcher
                .create_node(5001, Some("/nonexistent/chash-node"))
                .await,
            Err(DispatchError::ExecutableNotFound(_))
        ));
        assert!(dispatcher.list_nodes().await.is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = Dispatcher::new(DispatcherConfig {
            virtual_nodes: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_create_node_rejects_taken_port() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        dispatcher
            .registry()
            .add_node(NodeInfo::new("n1", 5001))
            .await;
        let executable = std::env::current_exe().unwrap();
        let result = dispatcher
            .create_node(5001, executable.to_str())
            .await;
        assert!(matches!(
            result,
            Err(DispatchError::PortInUse { port: 5001, .. })
        ));
        assert_eq!(dispatcher.list_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_node() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        assert!(matches!(
            dispatcher.delete_node("missing").await,
            Err(DispatchError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rebalance_empty() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        assert!(matches!(
            dispatcher.rebalance().await,
            Err(DispatchError::EmptyRing)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_with_no_nodes() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        let message = dispatcher.shutdown("tester").await;
        assert!(message.contains("0 nodes"));
    }
}
