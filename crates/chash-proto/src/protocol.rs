//! tarpc service trait definitions.
//!
//! Two services make up the system:
//!
//! - [`NodeService`] is served by every worker node and exposes the plain
//!   per-kind CRUD store.
//! - [`DispatcherService`] is served by the dispatcher. It exposes node
//!   lifecycle management plus the same CRUD surface, routed to the owning
//!   worker by consistent hashing.

use crate::types::{
    Customer, MigrationSummary, NewCustomer, NewOrder, NewProduct, NodeCreated, NodeDeleted,
    NodeInfo, Order, Product,
};
use serde::{Deserialize, Serialize};

/// Result type for RPC operations that needs to be serializable.
pub type RpcResult<T> = Result<T, RpcError>;

/// Serializable error type for RPC calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcError {
    /// Entity, node or executable not found.
    NotFound(String),
    /// No worker nodes are registered.
    Unavailable(String),
    /// Malformed request (e.g. an id that is not a hex digest).
    InvalidArgument(String),
    /// A downstream call ran past its deadline.
    DeadlineExceeded(String),
    /// Internal error.
    Internal(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RpcError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            RpcError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            RpcError::DeadlineExceeded(msg) => write!(f, "Deadline exceeded: {}", msg),
            RpcError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Service provided by each worker node.
///
/// `create_*` is an upsert keyed by the id the record already carries; the
/// worker never mints ids.
#[tarpc::service]
pub trait NodeService {
    async fn create_customer(customer: Customer) -> RpcResult<Customer>;
    async fn get_customer(id: String) -> RpcResult<Option<Customer>>;
    async fn update_customer(customer: Customer) -> RpcResult<Option<Customer>>;
    async fn delete_customer(id: String) -> RpcResult<bool>;
    async fn list_customers() -> RpcResult<Vec<Customer>>;

    async fn create_order(order: Order) -> RpcResult<Order>;
    async fn get_order(id: String) -> RpcResult<Option<Order>>;
    async fn update_order(order: Order) -> RpcResult<Option<Order>>;
    async fn delete_order(id: String) -> RpcResult<bool>;
    async fn list_orders() -> RpcResult<Vec<Order>>;

    async fn create_product(product: Product) -> RpcResult<Product>;
    async fn get_product(id: String) -> RpcResult<Option<Product>>;
    async fn update_product(product: Product) -> RpcResult<Option<Product>>;
    async fn delete_product(id: String) -> RpcResult<bool>;
    async fn list_products() -> RpcResult<Vec<Product>>;
}

/// Service provided by the dispatcher.
#[tarpc::service]
pub trait DispatcherService {
    /// Spawn a worker on `preferred_port` and move the entities it now owns
    /// onto it. Blocks until migration completes.
    async fn create_node(preferred_port: u16, node_path: Option<String>) -> RpcResult<NodeCreated>;

    /// Drain a worker's entities to their new owners, then kill it.
    async fn delete_node(node_id: String) -> RpcResult<NodeDeleted>;

    /// Snapshot of the registered workers.
    async fn list_nodes() -> Vec<NodeInfo>;

    /// Move every entity that is not held by its ring owner.
    async fn rebalance() -> RpcResult<MigrationSummary>;

    /// Kill every worker and exit the dispatcher shortly after replying.
    async fn shutdown(requester_id: String) -> RpcResult<String>;

    async fn create_customer(request: NewCustomer) -> RpcResult<Customer>;
    async fn get_customer(id: String) -> RpcResult<Customer>;
    async fn update_customer(customer: Customer) -> RpcResult<Customer>;
    async fn delete_customer(id: String) -> RpcResult<bool>;
    async fn list_customers() -> RpcResult<Vec<Customer>>;

    async fn create_order(request: NewOrder) -> RpcResult<Order>;
    async fn get_order(id: String) -> RpcResult<Order>;
    async fn update_order(order: Order) -> RpcResult<Order>;
    async fn delete_order(id: String) -> RpcResult<bool>;
    async fn list_orders() -> RpcResult<Vec<Order>>;

    async fn create_product(request: NewProduct) -> RpcResult<Product>;
    async fn get_product(id: String) -> RpcResult<Product>;
    async fn update_product(product: Product) -> RpcResult<Product>;
    async fn delete_product(id: String) -> RpcResult<bool>;
    async fn list_products() -> RpcResult<Vec<Product>>;
}
