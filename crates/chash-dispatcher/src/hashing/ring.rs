//! The consistent hash ring.

use super::{replica_id, ContentId};
use crate::types::{DispatchError, DispatchResult};
use chash_proto::NodeInfo;
use std::collections::BTreeMap;

/// Default number of virtual nodes per worker.
pub const DEFAULT_VIRTUAL_NODES: u32 = 100;

/// A consistent hash ring mapping SHA-256 positions to worker nodes.
///
/// Each worker occupies `virtual_nodes` positions, one per replica digest
/// `sha256("{node_id}#{i}")`. A key is owned by the first replica at or
/// after its position, wrapping around to the lowest position.
///
/// When two replicas land on the same position the later insert wins, and
/// removing a node only clears positions it still owns.
///
/// The ring is plain data; [`NodeRegistry`](crate::coordinator::NodeRegistry)
/// guards it together with the node table.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Ring mapping hash positions to nodes.
    ring: BTreeMap<u32, NodeInfo>,
    /// Virtual nodes per worker.
    virtual_nodes: u32,
}

impl HashRing {
    /// Create an empty ring with [`DEFAULT_VIRTUAL_NODES`] replicas per node.
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    /// Create an empty ring with a custom replica count.
    ///
    /// # Panics
    ///
    /// Panics if `virtual_nodes` is 0.
    pub fn with_virtual_nodes(virtual_nodes: u32) -> Self {
        assert!(virtual_nodes > 0, "Virtual nodes must be greater than 0");
        Self {
            ring: BTreeMap::new(),
            virtual_nodes,
        }
    }

    /// Place all replicas of `node` on the ring.
    pub fn add_node(&mut self, node: &NodeInfo) {
        for vnode in 0..self.virtual_nodes {
            let position = replica_id(&node.node_id, vnode).position();
            self.ring.insert(position, node.clone());
        }
    }

    /// Remove every position still owned by `node_id`. Returns how many
    /// positions were cleared.
    pub fn remove_node(&mut self, node_id: &str) -> usize {
        let before = self.ring.len();
        self.ring.retain(|_, owner| owner.node_id != node_id);
        before - self.ring.len()
    }

    /// Find the node owning `key`.
    ///
    /// O(log n) in the number of virtual nodes.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EmptyRing`] if no node is registered.
    pub fn get_node(&self, key: &ContentId) -> DispatchResult<&NodeInfo> {
        let position = key.position();

        // First replica clockwise from the key, wrapping to the start.
        self.ring
            .range(position..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node)
            .ok_or(DispatchError::EmptyRing)
    }

    /// Whether no node is on the ring.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Distinct nodes on the ring, sorted by node id.
    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.ring.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes.dedup_by(|a, b| a.node_id == b.node_id);
        nodes
    }

    /// Get the number of virtual nodes per worker.
    pub fn virtual_nodes_per_node(&self) -> u32 {
        self.virtual_nodes
    }

    /// Get the total number of occupied positions.
    pub fn total_virtual_nodes(&self) -> usize {
        self.ring.len()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}
