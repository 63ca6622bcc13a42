//! Moving entities between workers after a topology change.
//!
//! Every move is create-on-target first, then delete-on-source, so an entity
//! is never absent from the cluster mid-move. A failed delete leaves a stale
//! duplicate on the source, which is counted and which a later rebalance
//! removes.

use super::NodeRegistry;
use crate::hashing::ContentId;
use crate::routing::Routed;
use crate::rpc::client::NodeClients;
use crate::types::DispatchResult;
use chash_proto::{Customer, MigrationSummary, NodeInfo, Order, Product, Record};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything one worker held at the time it was listed.
#[derive(Debug, Default)]
pub struct Holdings {
    pub customers: Vec<Customer>,
    pub orders: Vec<Order>,
    pub products: Vec<Product>,
}

impl Holdings {
    /// Total number of records.
    pub fn len(&self) -> usize {
        self.customers.len() + self.orders.len() + self.products.len()
    }

    /// Whether nothing was held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Moves records to the worker the ring says should own them.
pub struct Migrator {
    registry: Arc<NodeRegistry>,
    clients: Arc<NodeClients>,
    /// Attempts at deleting the source copy of a moved record.
    delete_retries: u32,
}

impl Migrator {
    /// Create a migrator over the shared registry and clients.
    pub fn new(registry: Arc<NodeRegistry>, clients: Arc<NodeClients>, delete_retries: u32) -> Self {
        Self {
            registry,
            clients,
            delete_retries: delete_retries.max(1),
        }
    }

    /// List every record a worker holds.
    ///
    /// # Errors
    ///
    /// Fails if any of the three listings fails.
    pub async fn holdings(&self, node: &NodeInfo) -> DispatchResult<Holdings> {
        Ok(Holdings {
            customers: self.list::<Customer>(node).await?,
            orders: self.list::<Order>(node).await?,
            products: self.list::<Product>(node).await?,
        })
    }

    /// Move the records on `source` whose owner is no longer `source`.
    ///
    /// With `only_to`, only records now owned by that node are moved; this
    /// is the pass run after a node joins. The first failure aborts the rest
    /// of this source's batch and is reported in `aborted`; records already
    /// moved stay moved.
    pub async fn rebalance_from(&self, source: &NodeInfo, only_to: Option<&str>) -> MigrationSummary {
        let mut summary = MigrationSummary::default();

        let result = async {
            self.move_misplaced::<Customer>(source, only_to, &mut summary)
                .await?;
            self.move_misplaced::<Order>(source, only_to, &mut summary)
                .await?;
            self.move_misplaced::<Product>(source, only_to, &mut summary)
                .await
        }
        .await;

        if let Err(e) = result {
            warn!("Migration off node {} aborted: {}", source, e);
            summary.aborted.push((source.node_id.clone(), e.to_string()));
        }
        if summary.migrated > 0 {
            info!(
                "Moved {} records off node {} ({} stale)",
                summary.migrated, source, summary.stale
            );
        }
        summary
    }

    /// Re-create a departed worker's records on their current owners.
    ///
    /// `from` must already be off the ring. If the ring is empty the
    /// remaining records are dropped and the abort is reported.
    pub async fn rehome(&self, from: &NodeInfo, holdings: Holdings) -> MigrationSummary {
        let mut summary = MigrationSummary::default();
        let total = holdings.len();

        let result = async {
            self.rehome_all(holdings.customers, &mut summary).await?;
            self.rehome_all(holdings.orders, &mut summary).await?;
            self.rehome_all(holdings.products, &mut summary).await
        }
        .await;

        if let Err(e) = result {
            warn!(
                "Re-homing records of node {} aborted after {} of {}: {}",
                from, summary.migrated, total, e
            );
            summary.aborted.push((from.node_id.clone(), e.to_string()));
        }
        summary
    }

    async fn move_misplaced<E: Routed>(
        &self,
        source: &NodeInfo,
        only_to: Option<&str>,
        summary: &mut MigrationSummary,
    ) -> DispatchResult<()> {
        for record in self.list::<E>(source).await? {
            let Some(id) = parse_held_id(&record, source) else {
                continue;
            };
            let owner = self.registry.node_for_key(&id).await?;
            if owner.node_id == source.node_id {
                continue;
            }
            if only_to.is_some_and(|target| owner.node_id != target) {
                continue;
            }
            // Every worker shares one host, so the port is the address.
            if owner.port == source.port {
                warn!(
                    "Not moving {} {}: owner {} and holder {} share port {}",
                    E::KIND,
                    id,
                    owner,
                    source,
                    source.port
                );
                continue;
            }

            debug!("Moving {} {} from {} to {}", E::KIND, id, source, owner);
            self.clients
                .call(&owner, |client, ctx| E::put(client, ctx, record))
                .await?;
            summary.migrated += 1;

            if !self.delete_with_retry::<E>(source, &id).await {
                summary.stale += 1;
            }
        }
        Ok(())
    }

    async fn rehome_all<E: Routed>(
        &self,
        records: Vec<E>,
        summary: &mut MigrationSummary,
    ) -> DispatchResult<()> {
        for record in records {
            let Ok(id) = ContentId::parse(record.id()) else {
                warn!("Dropping {} with malformed id {:?}", E::KIND, record.id());
                continue;
            };
            let owner = self.registry.node_for_key(&id).await?;
            debug!("Re-homing {} {} to {}", E::KIND, id, owner);
            self.clients
                .call(&owner, |client, ctx| E::put(client, ctx, record))
                .await?;
            summary.migrated += 1;
        }
        Ok(())
    }

    async fn delete_with_retry<E: Routed>(&self, source: &NodeInfo, id: &ContentId) -> bool {
        for attempt in 1..=self.delete_retries {
            let key = id.as_str().to_string();
            match self
                .clients
                .call(source, |client, ctx| E::remove(client, ctx, key))
                .await
            {
                Ok(_) => return true,
                Err(e) => warn!(
                    "Deleting moved {} {} from {} failed (attempt {}/{}): {}",
                    E::KIND,
                    id,
                    source,
                    attempt,
                    self.delete_retries,
                    e
                ),
            }
        }
        false
    }

    async fn list<E: Routed>(&self, node: &NodeInfo) -> DispatchResult<Vec<E>> {
        self.clients
            .call(node, |client, ctx| E::list(client, ctx))
            .await
    }
}

fn parse_held_id<E: Record>(record: &E, holder: &NodeInfo) -> Option<ContentId> {
    match ContentId::parse(record.id()) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(
                "Node {} holds {} with malformed id {:?}; leaving it in place",
                holder,
                E::KIND,
                record.id()
            );
            None
        }
    }
}
