//! Node registry for tracking live workers.
//!
//! The node table and the hash ring change together, so both live behind one
//! lock: a reader never sees a node on the ring that the table has dropped,
//! or the other way round.

use crate::hashing::{ContentId, HashRing};
use crate::types::DispatchResult;
use chash_proto::NodeInfo;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Topology {
    nodes: HashMap<String, NodeInfo>,
    ring: HashRing,
}

/// Registry of live workers and the ring that routes to them.
#[derive(Debug)]
pub struct NodeRegistry {
    topology: RwLock<Topology>,
}

impl NodeRegistry {
    /// Create an empty registry whose ring uses `virtual_nodes` replicas.
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            topology: RwLock::new(Topology {
                nodes: HashMap::new(),
                ring: HashRing::with_virtual_nodes(virtual_nodes),
            }),
        }
    }

    /// Register a node and place it on the ring.
    ///
    /// Registering an id that is already present changes nothing and
    /// returns `false`.
    pub async fn add_node(&self, node: NodeInfo) -> bool {
        let mut topology = self.topology.write().await;
        if topology.nodes.contains_key(&node.node_id) {
            warn!("Node {} is already registered", node.node_id);
            return false;
        }
        topology.ring.add_node(&node);
        info!("Registered node {}", node);
        topology.nodes.insert(node.node_id.clone(), node);
        true
    }

    /// Unregister a node and take it off the ring. Returns whether it was
    /// registered.
    pub async fn remove_node(&self, node_id: &str) -> bool {
        let mut topology = self.topology.write().await;
        match topology.nodes.remove(node_id) {
            Some(node) => {
                let cleared = topology.ring.remove_node(node_id);
                info!("Unregistered node {} ({} ring positions)", node, cleared);
                true
            }
            None => {
                debug!("Node {} was not registered", node_id);
                false
            }
        }
    }

    /// Look up a node by id.
    pub async fn try_get_node(&self, node_id: &str) -> Option<NodeInfo> {
        self.topology.read().await.nodes.get(node_id).cloned()
    }

    /// Snapshot of all registered nodes, sorted by port then id.
    pub async fn all_nodes(&self) -> Vec<NodeInfo> {
        let topology = self.topology.read().await;
        let mut nodes: Vec<NodeInfo> = topology.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.port.cmp(&b.port).then_with(|| a.node_id.cmp(&b.node_id)));
        nodes
    }

    /// The node that owns `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyRing`](crate::types::DispatchError::EmptyRing)
    /// if no node is registered.
    pub async fn node_for_key(&self, key: &ContentId) -> DispatchResult<NodeInfo> {
        let topology = self.topology.read().await;
        topology.ring.get_node(key).cloned()
    }

    /// Number of registered nodes.
    pub async fn count(&self) -> usize {
        self.topology.read().await.nodes.len()
    }

    /// Whether a node is registered.
    pub async fn contains(&self, node_id: &str) -> bool {
        self.topology.read().await.nodes.contains_key(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::compute_id;
    use crate::types::DispatchError;

    #[tokio::test]
    async fn test_add_and_lookup() {
        let registry = NodeRegistry::new(100);
        assert!(registry.add_node(NodeInfo::new("a", 5001)).await);
        assert_eq!(registry.count().await, 1);
        assert_eq!(
            registry.try_get_node("a").await,
            Some(NodeInfo::new("a", 5001))
        );

        let key = compute_id(&"anything").unwrap();
        assert_eq!(registry.node_for_key(&key).await.unwrap().node_id, "a");
    }

    #[tokio::test]
    async fn test_duplicate_add_is_noop() {
        let registry = NodeRegistry::new(100);
        registry.add_node(NodeInfo::new("a", 5001)).await;
        assert!(!registry.add_node(NodeInfo::new("a", 6000)).await);
        assert_eq!(registry.try_get_node("a").await.unwrap().port, 5001);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_node() {
        let registry = NodeRegistry::new(100);
        registry.add_node(NodeInfo::new("a", 5001)).await;
        registry.add_node(NodeInfo::new("b", 5002)).await;

        assert!(registry.remove_node("a").await);
        assert!(!registry.remove_node("a").await);
        assert!(!registry.contains("a").await);

        for i in 0..100u32 {
            let key = compute_id(&i).unwrap();
            assert_eq!(registry.node_for_key(&key).await.unwrap().node_id, "b");
        }
    }

    #[tokio::test]
    async fn test_empty_registry_has_no_owner() {
        let registry = NodeRegistry::new(100);
        let key = compute_id(&1u32).unwrap();
        assert!(matches!(
            registry.node_for_key(&key).await,
            Err(DispatchError::EmptyRing)
        ));
        assert!(registry.try_get_node("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_all_nodes_sorted() {
        let registry = NodeRegistry::new(10);
        registry.add_node(NodeInfo::new("z", 5003)).await;
        registry.add_node(NodeInfo::new("y", 5001)).await;
        registry.add_node(NodeInfo::new("x", 5002)).await;
        let ports: Vec<u16> = registry.all_nodes().await.iter().map(|n| n.port).collect();
        assert_eq!(ports, vec![5001, 5002, 5003]);
    }
}
