//! In-memory entity storage for a worker node.
//!
//! Each entity kind gets its own [`Table`], a map from record id to record.
//! Nothing is persisted; a restarted worker starts empty.

use chash_proto::{Customer, Order, Product, Record};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// A keyed table of one record kind.
pub struct Table<R: Record> {
    rows: RwLock<HashMap<String, R>>,
}

impl<R: Record> Table<R> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite a record under the id it carries.
    ///
    /// A record without a creation timestamp is stamped with the current
    /// time; a record that already has one (e.g. one being migrated from
    /// another node) keeps it.
    pub async fn create(&self, mut record: R) -> R {
        record.stamp_created(current_timestamp());
        let mut rows = self.rows.write().await;
        rows.insert(record.id().to_string(), record.clone());
        record
    }

    /// Look up a record by id.
    pub async fn get(&self, id: &str) -> Option<R> {
        self.rows.read().await.get(id).cloned()
    }

    /// Replace an existing record. Returns `None` if the id is unknown.
    pub async fn update(&self, mut record: R) -> Option<R> {
        let mut rows = self.rows.write().await;
        let stored = rows.get_mut(record.id())?;
        record.carry_over(stored);
        *stored = record.clone();
        Some(record)
    }

    /// Remove a record. Returns whether it was present.
    pub async fn delete(&self, id: &str) -> bool {
        self.rows.write().await.remove(id).is_some()
    }

    /// All records, in no particular order.
    pub async fn list(&self) -> Vec<R> {
        self.rows.read().await.values().cloned().collect()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the table holds no records.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl<R: Record> Default for Table<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// All tables held by one worker node.
#[derive(Clone, Default)]
pub struct NodeStore {
    pub customers: Arc<Table<Customer>>,
    pub orders: Arc<Table<Order>>,
    pub products: Arc<Table<Product>>,
}

impl NodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all kinds.
    pub async fn total_records(&self) -> usize {
        self.customers.len().await + self.orders.len().await + self.products.len().await
    }
}

/// Get current Unix timestamp in milliseconds.
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chash_proto::NewCustomer;

    fn customer(id: &str, name: &str) -> Customer {
        Customer::from_fields(
            id.to_string(),
            NewCustomer {
                full_name: name.to_string(),
                email: format!("{}@example.com", name),
                phone_number: "555-0100".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_stamps_timestamp() {
        let table = Table::new();
        let stored = table.create(customer("c1", "ada")).await;
        assert!(stored.created_at.is_some());
        assert_eq!(table.get("c1").await, Some(stored));
    }

    #[tokio::test]
    async fn test_create_preserves_existing_timestamp() {
        let table = Table::new();
        let mut migrated = customer("c1", "ada");
        migrated.created_at = Some(7);
        let stored = table.create(migrated).await;
        assert_eq!(stored.created_at, Some(7));
    }

    #[tokio::test]
    async fn test_create_is_upsert() {
        let table = Table::new();
        table.create(customer("c1", "ada")).await;
        table.create(customer("c1", "grace")).await;
        assert_eq!(table.len().await, 1);
        assert_eq!(table.get("c1").await.unwrap().full_name, "grace");
    }

    #[tokio::test]
    async fn test_update_unknown_returns_none() {
        let table: Table<Customer> = Table::new();
        assert!(table.update(customer("missing", "x")).await.is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let table = Table::new();
        let stored = table.create(customer("c1", "ada")).await;
        let updated = table.update(customer("c1", "ada lovelace")).await.unwrap();
        assert_eq!(updated.full_name, "ada lovelace");
        assert_eq!(updated.created_at, stored.created_at);
    }

    #[tokio::test]
    async fn test_delete() {
        let table = Table::new();
        table.create(customer("c1", "ada")).await;
        assert!(table.delete("c1").await);
        assert!(!table.delete("c1").await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_totals() {
        let store = NodeStore::new();
        store.customers.create(customer("c1", "ada")).await;
        store
            .products
            .create(Product {
                id: "p1".into(),
                name: "lamp".into(),
                price: 3.0,
                stock_quantity: 1,
            })
            .await;
        assert_eq!(store.total_records().await, 2);
        assert_eq!(store.customers.list().await.len(), 1);
    }
}
