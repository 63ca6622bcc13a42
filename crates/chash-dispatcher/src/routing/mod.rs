//! Entity routing.
//!
//! An [`EntityRouter`] forwards CRUD requests for one record kind to the
//! worker that owns the record's id on the ring. Creation derives the id
//! from the request content, so repeating a create lands on the same worker
//! and overwrites the same record.

mod routed;

pub use routed::Routed;

use crate::coordinator::NodeRegistry;
use crate::hashing::{compute_id, ContentId};
use crate::rpc::client::NodeClients;
use crate::types::{DispatchError, DispatchResult};
use chash_proto::{Customer, Order, Product};
use futures::stream::{self, StreamExt};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes requests for records of type `E`.
pub struct EntityRouter<E> {
    registry: Arc<NodeRegistry>,
    clients: Arc<NodeClients>,
    /// Maximum concurrent worker calls during `list_all`.
    max_fanout: usize,
    _kind: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityRouter<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            clients: Arc::clone(&self.clients),
            max_fanout: self.max_fanout,
            _kind: PhantomData,
        }
    }
}

impl<E: Routed> EntityRouter<E> {
    /// Create a router over a shared registry and client pool.
    pub fn new(registry: Arc<NodeRegistry>, clients: Arc<NodeClients>, max_fanout: usize) -> Self {
        Self {
            registry,
            clients,
            max_fanout: max_fanout.max(1),
            _kind: PhantomData,
        }
    }

    /// Create a record from its fields.
    ///
    /// The id is the digest of the fields, so identical requests address
    /// the same record; the worker upserts it.
    pub async fn create(&self, fields: E::Fields) -> DispatchResult<E> {
        let id = compute_id(&fields)?;
        let owner = self.registry.node_for_key(&id).await?;
        debug!("Routing new {} {} to {}", E::KIND, id, owner);

        let record = E::from_fields(id.into_string(), fields);
        self.clients
            .call(&owner, |client, ctx| E::put(client, ctx, record))
            .await
    }

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EntityNotFound`] if the owner does not hold it.
    pub async fn get(&self, id: &str) -> DispatchResult<E> {
        let id = ContentId::parse(id)?;
        let owner = self.registry.node_for_key(&id).await?;
        let key = id.as_str().to_string();

        self.clients
            .call(&owner, |client, ctx| E::fetch(client, ctx, key))
            .await?
            .ok_or_else(|| DispatchError::EntityNotFound {
                kind: E::KIND,
                id: id.into_string(),
            })
    }

    /// Replace a record's mutable fields. Its id, and so its owner, never
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::EntityNotFound`] if the owner does not hold it.
    pub async fn update(&self, mut record: E) -> DispatchResult<E> {
        let id = ContentId::parse(record.id())?;
        let owner = self.registry.node_for_key(&id).await?;
        if record.id() != id.as_str() {
            record = normalize_id(record, &id)?;
        }

        self.clients
            .call(&owner, |client, ctx| E::replace(client, ctx, record))
            .await?
            .ok_or_else(|| DispatchError::EntityNotFound {
                kind: E::KIND,
                id: id.into_string(),
            })
    }

    /// Delete a record. Returns whether the owner held it.
    pub async fn delete(&self, id: &str) -> DispatchResult<bool> {
        let id = ContentId::parse(id)?;
        let owner = self.registry.node_for_key(&id).await?;
        let key = id.into_string();

        self.clients
            .call(&owner, |client, ctx| E::remove(client, ctx, key))
            .await
    }

    /// Gather every record of this kind from all workers.
    ///
    /// At most `max_fanout` workers are queried at once. A worker that
    /// fails is logged and skipped, so the result may be partial.
    pub async fn list_all(&self) -> Vec<E> {
        let nodes = self.registry.all_nodes().await;
        let clients = &self.clients;

        let batches: Vec<_> = stream::iter(nodes)
            .map(|node| async move {
                let result = clients.call(&node, |client, ctx| E::list(client, ctx)).await;
                (node, result)
            })
            .buffer_unordered(self.max_fanout)
            .collect()
            .await;

        let mut records = Vec::new();
        for (node, result) in batches {
            match result {
                Ok(batch) => records.extend(batch),
                Err(e) => warn!("Skipping node {} while listing {}s: {}", node, E::KIND, e),
            }
        }
        records
    }
}

/// Rewrite a record so its id is the normalized form.
fn normalize_id<E: Routed>(record: E, id: &ContentId) -> DispatchResult<E> {
    let mut value =
        serde_json::to_value(&record).map_err(|e| DispatchError::Serialization(e.to_string()))?;
    if let Some(field) = value.get_mut("id") {
        *field = serde_json::Value::String(id.as_str().to_string());
    }
    serde_json::from_value(value).map_err(|e| DispatchError::Serialization(e.to_string()))
}

/// One router per record kind, sharing registry and clients.
#[derive(Clone)]
pub struct Routers {
    pub customers: EntityRouter<Customer>,
    pub orders: EntityRouter<Order>,
    pub products: EntityRouter<Product>,
}

impl Routers {
    /// Build all three routers.
    pub fn new(registry: Arc<NodeRegistry>, clients: Arc<NodeClients>, max_fanout: usize) -> Self {
        Self {
            customers: EntityRouter::new(Arc::clone(&registry), Arc::clone(&clients), max_fanout),
            orders: EntityRouter::new(Arc::clone(&registry), Arc::clone(&clients), max_fanout),
            products: EntityRouter::new(registry, clients, max_fanout),
        }
    }
}
