//! tarpc server for the dispatcher.
//!
//! [`DispatcherServer`] wraps a [`Dispatcher`] and implements
//! [`DispatcherService`]: lifecycle calls go to the dispatcher itself, entity
//! calls to its per-kind routers.

use crate::coordinator::Dispatcher;
use crate::types::{DispatchError, DispatchResult};
use chash_proto::{
    Customer, DispatcherService, MigrationSummary, NewCustomer, NewOrder, NewProduct, NodeCreated,
    NodeDeleted, NodeInfo, Order, Product, RpcError, RpcResult,
};
use futures::{future, Future, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tokio::sync::Notify;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, instrument, warn};

/// Maximum number of client connections served concurrently.
const MAX_CONNECTIONS: usize = 64;

/// Server implementation for the dispatcher.
///
/// # Example
///
/// ```rust,ignore
/// use chash_dispatcher::{Dispatcher, DispatcherConfig, DispatcherServer};
///
/// let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default())?);
/// DispatcherServer::new(dispatcher)
///     .start("127.0.0.1:5000".parse().unwrap())
///     .await?;
/// ```
#[derive(Clone)]
pub struct DispatcherServer {
    dispatcher: Arc<Dispatcher>,
    /// Fired once the post-shutdown grace period has elapsed.
    stop: Arc<Notify>,
}

impl DispatcherServer {
    /// Create a new dispatcher server.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            stop: Arc::new(Notify::new()),
        }
    }

    /// The dispatcher this server exposes.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Bind to `addr` and return the bound address together with the serve
    /// loop. The loop ends after a `shutdown` call plus the grace delay.
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
        info!("Dispatcher listening on {}", local_addr);

        let stop = Arc::clone(&self.stop);
        let serving = listener
            .filter_map(|r| future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .for_each_concurrent(MAX_CONNECTIONS, move |channel| {
                let server = self.clone();
                channel.execute(server.serve()).for_each(spawn)
            });

        let run = async move {
            tokio::select! {
                _ = serving => {}
                _ = stop.notified() => info!("Dispatcher stopped"),
            }
        };
        Ok((local_addr, run))
    }

    /// Serve on the given address until shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn start(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let (_, run) = self.bind(addr).await?;
        run.await;
        Ok(())
    }

    fn schedule_stop(&self, grace: Duration) {
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            stop.notify_one();
        });
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Map a dispatcher result onto the wire, logging dispatcher-side faults.
fn reply<T>(result: DispatchResult<T>) -> RpcResult<T> {
    result.map_err(|e| {
        match &e {
            DispatchError::EntityNotFound { .. }
            | DispatchError::NodeNotFound(_)
            | DispatchError::InvalidId(_)
            | DispatchError::PortInUse { .. } => debug!("{}", e),
            DispatchError::EmptyRing | DispatchError::Downstream { .. } => warn!("{}", e),
            _ => error!("{}", e),
        }
        RpcError::from(e)
    })
}

impl DispatcherService for DispatcherServer {
    #[instrument(skip(self, _ctx))]
    async fn create_node(
        self,
        _ctx: Context,
        preferred_port: u16,
        node_path: Option<String>,
    ) -> RpcResult<NodeCreated> {
        reply(
            self.dispatcher
                .create_node(preferred_port, node_path.as_deref())
                .await,
        )
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_node(self, _ctx: Context, node_id: String) -> RpcResult<NodeDeleted> {
        reply(self.dispatcher.delete_node(&node_id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_nodes(self, _ctx: Context) -> Vec<NodeInfo> {
        self.dispatcher.list_nodes().await
    }

    #[instrument(skip(self, _ctx))]
    async fn rebalance(self, _ctx: Context) -> RpcResult<MigrationSummary> {
        reply(self.dispatcher.rebalance().await)
    }

    #[instrument(skip(self, _ctx))]
    async fn shutdown(self, _ctx: Context, requester_id: String) -> RpcResult<String> {
        let message = self.dispatcher.shutdown(&requester_id).await;
        self.schedule_stop(self.dispatcher.config().shutdown_grace());
        Ok(message)
    }

    #[instrument(skip(self, _ctx, request))]
    async fn create_customer(self, _ctx: Context, request: NewCustomer) -> RpcResult<Customer> {
        reply(self.dispatcher.routers().customers.create(request).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn get_customer(self, _ctx: Context, id: String) -> RpcResult<Customer> {
        reply(self.dispatcher.routers().customers.get(&id).await)
    }

    #[instrument(skip(self, _ctx, customer), fields(id = %customer.id))]
    async fn update_customer(self, _ctx: Context, customer: Customer) -> RpcResult<Customer> {
        reply(self.dispatcher.routers().customers.update(customer).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_customer(self, _ctx: Context, id: String) -> RpcResult<bool> {
        reply(self.dispatcher.routers().customers.delete(&id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_customers(self, _ctx: Context) -> RpcResult<Vec<Customer>> {
        Ok(self.dispatcher.routers().customers.list_all().await)
    }

    #[instrument(skip(self, _ctx, request))]
    async fn create_order(self, _ctx: Context, request: NewOrder) -> RpcResult<Order> {
        reply(self.dispatcher.routers().orders.create(request).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn get_order(self, _ctx: Context, id: String) -> RpcResult<Order> {
        reply(self.dispatcher.routers().orders.get(&id).await)
    }

    #[instrument(skip(self, _ctx, order), fields(id = %order.id))]
    async fn update_order(self, _ctx: Context, order: Order) -> RpcResult<Order> {
        reply(self.dispatcher.routers().orders.update(order).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_order(self, _ctx: Context, id: String) -> RpcResult<bool> {
        reply(self.dispatcher.routers().orders.delete(&id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_orders(self, _ctx: Context) -> RpcResult<Vec<Order>> {
        Ok(self.dispatcher.routers().orders.list_all().await)
    }

    #[instrument(skip(self, _ctx, request))]
    async fn create_product(self, _ctx: Context, request: NewProduct) -> RpcResult<Product> {
        reply(self.dispatcher.routers().products.create(request).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn get_product(self, _ctx: Context, id: String) -> RpcResult<Product> {
        reply(self.dispatcher.routers().products.get(&id).await)
    }

    #[instrument(skip(self, _ctx, product), fields(id = %product.id))]
    async fn update_product(self, _ctx: Context, product: Product) -> RpcResult<Product> {
        reply(self.dispatcher.routers().products.update(product).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_product(self, _ctx: Context, id: String) -> RpcResult<bool> {
        reply(self.dispatcher.routers().products.delete(&id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn list_products(self, _ctx: Context) -> RpcResult<Vec<Product>> {
        Ok(self.dispatcher.routers().products.list_all().await)
    }
}
