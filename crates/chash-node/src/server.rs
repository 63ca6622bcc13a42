//! tarpc server for a worker node.
//!
//! [`NodeServer`] wraps a [`NodeStore`] and implements [`NodeService`], so
//! the dispatcher can create, read, update, delete and list entities on this
//! node over RPC.

use crate::store::NodeStore;
use chash_proto::{Customer, NodeService, Order, Product, RpcResult};
use futures::{future, Future, StreamExt};
use std::net::SocketAddr;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tokio_serde::formats::Bincode;
use tracing::{debug, info, instrument, warn};

/// Maximum number of client connections served concurrently.
const MAX_CONNECTIONS: usize = 64;

/// Server implementation for a worker node.
///
/// Handlers receive a clone of the server; the store's tables are shared
/// behind `Arc`s and synchronize internally.
#[derive(Clone, Default)]
pub struct NodeServer {
    store: NodeStore,
}

impl NodeServer {
    /// Create a server over the given store.
    pub fn new(store: NodeStore) -> Self {
        Self { store }
    }

    /// The store this server exposes.
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Bind to `addr` and return the bound address together with the
    /// accept loop, which runs until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn bind(
        self,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), std::io::Error> {
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        let local_addr = listener.local_addr();
        info!("Node server listening on {}", local_addr);

        let serving = listener
            .filter_map(|r| future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .for_each_concurrent(MAX_CONNECTIONS, move |channel| {
                let server = self.clone();
                channel.execute(server.serve()).for_each(spawn)
            });

        Ok((local_addr, serving))
    }

    /// Start serving on the given address.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn start(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let (_, serving) = self.bind(addr).await?;
        serving.await;
        Ok(())
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

impl NodeService for NodeServer {
    #[instrument(skip(self, _ctx, customer), fields(id = %customer.id))]
    async fn create_customer(self, _ctx: Context, customer: Customer) -> RpcResult<Customer> {
        debug!("Creating customer");
        Ok(self.store.customers.create(customer).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn get_customer(self, _ctx: Context, id: String) -> RpcResult<Option<Customer>> {
        let customer = self.store.customers.get(&id).await;
        if customer.is_none() {
            warn!("Customer {} not found", id);
        }
        Ok(customer)
    }

    #[instrument(skip(self, _ctx, customer), fields(id = %customer.id))]
    async fn update_customer(
        self,
        _ctx: Context,
        customer: Customer,
    ) -> RpcResult<Option<Customer>> {
        let updated = self.store.customers.update(customer).await;
        debug!("Customer updated: {}", updated.is_some());
        Ok(updated)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_customer(self, _ctx: Context, id: String) -> RpcResult<bool> {
        let removed = self.store.customers.delete(&id).await;
        debug!("Customer removed: {}", removed);
        Ok(removed)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_customers(self, _ctx: Context) -> RpcResult<Vec<Customer>> {
        let customers = self.store.customers.list().await;
        debug!("Returning {} customers", customers.len());
        Ok(customers)
    }

    #[instrument(skip(self, _ctx, order), fields(id = %order.id))]
    async fn create_order(self, _ctx: Context, order: Order) -> RpcResult<Order> {
        debug!("Creating order");
        Ok(self.store.orders.create(order).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn get_order(self, _ctx: Context, id: String) -> RpcResult<Option<Order>> {
        let order = self.store.orders.get(&id).await;
        if order.is_none() {
            warn!("Order {} not found", id);
        }
        Ok(order)
    }

    #[instrument(skip(self, _ctx, order), fields(id = %order.id))]
    async fn update_order(self, _ctx: Context, order: Order) -> RpcResult<Option<Order>> {
        Ok(self.store.orders.update(order).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_order(self, _ctx: Context, id: String) -> RpcResult<bool> {
        Ok(self.store.orders.delete(&id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_orders(self, _ctx: Context) -> RpcResult<Vec<Order>> {
        let orders = self.store.orders.list().await;
        debug!("Returning {} orders", orders.len());
        Ok(orders)
    }

    #[instrument(skip(self, _ctx, product), fields(id = %product.id))]
    async fn create_product(self, _ctx: Context, product: Product) -> RpcResult<Product> {
        debug!("Creating product");
        Ok(self.store.products.create(product).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn get_product(self, _ctx: Context, id: String) -> RpcResult<Option<Product>> {
        let product = self.store.products.get(&id).await;
        if product.is_none() {
            warn!("Product {} not found", id);
        }
        Ok(product)
    }

    #[instrument(skip(self, _ctx, product), fields(id = %product.id))]
    async fn update_product(self, _ctx: Context, product: Product) -> RpcResult<Option<Product>> {
        Ok(self.store.products.update(product).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_product(self, _ctx: Context, id: String) -> RpcResult<bool> {
        Ok(self.store.products.delete(&id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_products(self, _ctx: Context) -> RpcResult<Vec<Product>> {
        let products = self.store.products.list().await;
        debug!("Returning {} products", products.len());
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chash_proto::{NewProduct, NodeServiceClient, Record};
    use tarpc::{client, context};

    #[tokio::test]
    async fn test_serves_crud_over_tcp() {
        let server = NodeServer::default();
        let store = server.store().clone();
        let (addr, serving) = server
            .bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        tokio::spawn(serving);

        let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default)
            .await
            .unwrap();
        let client = NodeServiceClient::new(client::Config::default(), transport).spawn();

        let product = Product::from_fields(
            "ab".repeat(32),
            NewProduct {
                name: "lamp".into(),
                price: 19.99,
                stock_quantity: 4,
            },
        );
        let created = client
            .create_product(context::current(), product.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created, product);
        assert_eq!(store.products.len().await, 1);

        let fetched = client
            .get_product(context::current(), product.id.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, Some(product.clone()));

        let removed = client
            .delete_product(context::current(), product.id.clone())
            .await
            .unwrap()
            .unwrap();
        assert!(removed);

        let listed = client
            .list_products(context::current())
            .await
            .unwrap()
            .unwrap();
        assert!(listed.is_empty());
    }
}
