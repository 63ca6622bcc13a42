//! Dispatcher-side types: worker status and the error taxonomy.

use chash_proto::{EntityKind, RpcError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a worker managed by the dispatcher.
///
/// A worker moves `Provisioning -> Active -> Draining -> Terminated`; it is
/// on the ring only while `Active` or `Draining`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Process started, not yet registered.
    Provisioning,
    /// Registered and receiving traffic.
    Active,
    /// Entities are being moved off; no longer owns ring positions.
    Draining,
    /// Process killed.
    Terminated,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Provisioning => write!(f, "provisioning"),
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Draining => write!(f, "draining"),
            NodeStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Errors that can occur in dispatcher operations.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("No worker nodes registered")]
    EmptyRing,

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("Node executable not found at {0}")]
    ExecutableNotFound(String),

    #[error("No node executable configured")]
    NoExecutable,

    #[error("Port {port} is already used by node {node}")]
    PortInUse { port: u16, node: String },

    #[error("Failed to start worker: {0}")]
    SpawnFailed(String),

    #[error("Invalid id {0:?}: expected a 64-character hex digest")]
    InvalidId(String),

    #[error("Could not connect to node {node}: {reason}")]
    ConnectFailed { node: String, reason: String },

    #[error("Call to node {node} exceeded its deadline")]
    DeadlineExceeded { node: String },

    #[error("Call to node {node} failed: {reason}")]
    TransportFailed { node: String, reason: String },

    #[error("Node {node} rejected the call: {error}")]
    Downstream { node: String, error: RpcError },

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<DispatchError> for RpcError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::EmptyRing => RpcError::Unavailable(err.to_string()),
            DispatchError::NodeNotFound(_)
            | DispatchError::EntityNotFound { .. }
            | DispatchError::ExecutableNotFound(_)
            | DispatchError::NoExecutable => RpcError::NotFound(err.to_string()),
            DispatchError::InvalidId(_) | DispatchError::PortInUse { .. } => {
                RpcError::InvalidArgument(err.to_string())
            }
            DispatchError::DeadlineExceeded { .. } => RpcError::DeadlineExceeded(err.to_string()),
            // The worker's own classification reaches the client unchanged.
            DispatchError::Downstream { error, .. } => error,
            DispatchError::SpawnFailed(_)
            | DispatchError::ConnectFailed { .. }
            | DispatchError::TransportFailed { .. }
            | DispatchError::Serialization(_) => RpcError::Internal(err.to_string()),
        }
    }
}
