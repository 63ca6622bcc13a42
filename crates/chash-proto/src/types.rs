//! Core wire types shared by the dispatcher and the worker nodes.
//!
//! This module defines node identity, the three entity kinds (customers,
//! orders, products) with their creation requests, and the responses of the
//! dispatcher's lifecycle operations.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Endpoint of a worker node registered with the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Stable node identity. Also seeds the node's ring replica names.
    pub node_id: String,
    /// Port the worker's RPC endpoint listens on.
    pub port: u16,
}

impl NodeInfo {
    /// Create a new node info.
    pub fn new(node_id: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            port,
        }
    }

    /// Format the worker's socket address on the given host.
    pub fn socket_addr(&self, host: &str) -> String {
        format!("{}:{}", host, self.port)
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.node_id, self.port)
    }
}

/// The kinds of entity the cluster stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Customer,
    Order,
    Product,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Customer => write!(f, "customer"),
            EntityKind::Order => write!(f, "order"),
            EntityKind::Product => write!(f, "product"),
        }
    }
}

/// Behavior common to every stored entity record.
///
/// A record is identified by its content-addressed `id`, which is computed
/// once from the creation request (`Self::Fields`) and never changes.
pub trait Record: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Client-supplied fields of a creation request. This is the value that
    /// gets content-addressed.
    type Fields: Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Which entity kind this record is.
    const KIND: EntityKind;

    /// Build a record from its id and creation fields.
    fn from_fields(id: String, fields: Self::Fields) -> Self;

    /// The record's id.
    fn id(&self) -> &str;

    /// Set the creation timestamp if the record does not carry one yet.
    fn stamp_created(&mut self, _now_ms: u64) {}

    /// Keep server-owned values from the stored version on update.
    fn carry_over(&mut self, _stored: &Self) {}
}

/// A stored customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    /// Unix milliseconds, stamped by the worker on first create.
    pub created_at: Option<u64>,
}

/// Fields of a customer creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
}

impl Record for Customer {
    type Fields = NewCustomer;
    const KIND: EntityKind = EntityKind::Customer;

    fn from_fields(id: String, fields: NewCustomer) -> Self {
        Self {
            id,
            full_name: fields.full_name,
            email: fields.email,
            phone_number: fields.phone_number,
            created_at: None,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp_created(&mut self, now_ms: u64) {
        self.created_at.get_or_insert(now_ms);
    }

    fn carry_over(&mut self, stored: &Self) {
        if self.created_at.is_none() {
            self.created_at = stored.created_at;
        }
    }
}

/// A stored order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub total_amount: f64,
    /// Unix milliseconds, stamped by the worker on first create.
    pub order_date: Option<u64>,
}

/// Fields of an order creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: String,
    pub total_amount: f64,
}

impl Record for Order {
    type Fields = NewOrder;
    const KIND: EntityKind = EntityKind::Order;

    fn from_fields(id: String, fields: NewOrder) -> Self {
        Self {
            id,
            customer_id: fields.customer_id,
            total_amount: fields.total_amount,
            order_date: None,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn stamp_created(&mut self, now_ms: u64) {
        self.order_date.get_or_insert(now_ms);
    }

    fn carry_over(&mut self, stored: &Self) {
        if self.order_date.is_none() {
            self.order_date = stored.order_date;
        }
    }
}

/// A stored product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub stock_quantity: u32,
}

/// Fields of a product creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub stock_quantity: u32,
}

impl Record for Product {
    type Fields = NewProduct;
    const KIND: EntityKind = EntityKind::Product;

    fn from_fields(id: String, fields: NewProduct) -> Self {
        Self {
            id,
            name: fields.name,
            price: fields.price,
            stock_quantity: fields.stock_quantity,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Result of a successful `create_node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreated {
    pub node_id: String,
    pub port: u16,
    /// Entities moved onto the new node.
    pub migrated: usize,
    pub message: String,
}

/// Result of a successful `delete_node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDeleted {
    pub node_id: String,
    /// Entities re-homed away from the deleted node.
    pub migrated: usize,
    pub message: String,
}

/// Outcome of a migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    /// Entities copied to their new owner.
    pub migrated: usize,
    /// Entities copied but whose source copy could not be deleted.
    pub stale: usize,
    /// Source nodes whose batch was aborted, with the reason.
    pub aborted: Vec<(String, String)>,
}

impl MigrationSummary {
    /// Whether every batch ran to completion.
    pub fn is_complete(&self) -> bool {
        self.aborted.is_empty()
    }

    /// Fold another pass into this one.
    pub fn absorb(&mut self, other: MigrationSummary) {
        self.migrated += other.migrated;
        self.stale += other.stale;
        self.aborted.extend(other.aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_info() {
        let node = NodeInfo::new("a1", 5001);
        assert_eq!(node.socket_addr("127.0.0.1"), "127.0.0.1:5001");
        assert_eq!(format!("{}", node), "a1@5001");
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Customer.to_string(), "customer");
        assert_eq!(EntityKind::Order.to_string(), "order");
        assert_eq!(EntityKind::Product.to_string(), "product");
    }

    #[test]
    fn test_stamp_keeps_existing_timestamp() {
        let mut customer = Customer::from_fields(
            "ab".repeat(32),
            NewCustomer {
                full_name: "Ada".into(),
                email: "ada@example.com".into(),
                phone_number: "1".into(),
            },
        );
        customer.stamp_created(10);
        customer.stamp_created(20);
        assert_eq!(customer.created_at, Some(10));
    }

    #[test]
    fn test_carry_over_fills_missing_date() {
        let stored = Order {
            id: "x".into(),
            customer_id: "c".into(),
            total_amount: 1.0,
            order_date: Some(42),
        };
        let mut update = Order {
            order_date: None,
            total_amount: 9.5,
            ..stored.clone()
        };
        update.carry_over(&stored);
        assert_eq!(update.order_date, Some(42));
        assert_eq!(update.total_amount, 9.5);
    }

    #[test]
    fn test_migration_summary_absorb() {
        let mut total = MigrationSummary::default();
        assert!(total.is_complete());
        total.absorb(MigrationSummary {
            migrated: 3,
            stale: 1,
            aborted: vec![("n1".into(), "boom".into())],
        });
        total.absorb(MigrationSummary {
            migrated: 2,
            ..Default::default()
        });
        assert_eq!(total.migrated, 5);
        assert_eq!(total.stale, 1);
        assert!(!total.is_complete());
    }

    #[test]
    fn test_record_serde() {
        let product = Product {
            id: "p".into(),
            name: "lamp".into(),
            price: 12.5,
            stock_quantity: 3,
        };
        let json = serde_json::to_string(&product).unwrap();
        let back: Product = serde_json::from_str(&json).unwrap();
        assert_eq!(back, product);
    }
}
