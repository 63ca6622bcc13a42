//! End-to-end tests: a dispatcher driving real worker servers on loopback.
//!
//! Workers run in-process through a test launcher instead of as child
//! processes; everything else (tarpc transport, routing, migration) is the
//! production path.

use async_trait::async_trait;
use chash_dispatcher::{
    connect_to_dispatcher, ContentId, DispatchError, Dispatcher, DispatcherConfig,
    DispatcherServer, NodeStatus, WorkerLauncher, WorkerProcess,
};
use chash_node::{NodeServer, NodeStore};
use chash_proto::{
    Customer, NewCustomer, NewOrder, NewProduct, NodeInfo, NodeService, Order, Product, RpcError,
    RpcResult,
};
use futures::{future, Future, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tarpc::context::{self, Context};
use tarpc::server::{BaseChannel, Channel};
use tokio::task::JoinHandle;
use tokio_serde::formats::Bincode;

/// Failures a test can switch on for one worker.
#[derive(Default)]
struct Faults {
    /// Creates still accepted; `None` is unlimited.
    creates_left: Mutex<Option<usize>>,
    reject_deletes: AtomicBool,
}

impl Faults {
    fn allow_creates(&self, limit: Option<usize>) {
        *self.creates_left.lock().unwrap() = limit;
    }

    fn reject_deletes(&self, reject: bool) {
        self.reject_deletes.store(reject, Ordering::SeqCst);
    }

    fn admit_create(&self) -> RpcResult<()> {
        let mut left = self.creates_left.lock().unwrap();
        match left.as_mut() {
            Some(0) => Err(RpcError::Internal("create refused".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn admit_delete(&self) -> RpcResult<()> {
        if self.reject_deletes.load(Ordering::SeqCst) {
            return Err(RpcError::Internal("delete refused".into()));
        }
        Ok(())
    }
}

/// A real `NodeServer` behind a switchboard of injected failures.
#[derive(Clone)]
struct TestWorker {
    inner: NodeServer,
    faults: Arc<Faults>,
}

impl NodeService for TestWorker {
    async fn create_customer(self, ctx: Context, customer: Customer) -> RpcResult<Customer> {
        self.faults.admit_create()?;
        self.inner.create_customer(ctx, customer).await
    }

    async fn get_customer(self, ctx: Context, id: String) -> RpcResult<Option<Customer>> {
        self.inner.get_customer(ctx, id).await
    }

    async fn update_customer(
        self,
        ctx: Context,
        customer: Customer,
    ) -> RpcResult<Option<Customer>> {
        self.inner.update_customer(ctx, customer).await
    }

    async fn delete_customer(self, ctx: Context, id: String) -> RpcResult<bool> {
        self.faults.admit_delete()?;
        self.inner.delete_customer(ctx, id).await
    }

    async fn list_customers(self, ctx: Context) -> RpcResult<Vec<Customer>> {
        self.inner.list_customers(ctx).await
    }

    async fn create_order(self, ctx: Context, order: Order) -> RpcResult<Order> {
        self.faults.admit_create()?;
        self.inner.create_order(ctx, order).await
    }

    async fn get_order(self, ctx: Context, id: String) -> RpcResult<Option<Order>> {
        self.inner.get_order(ctx, id).await
    }

    async fn update_order(self, ctx: Context, order: Order) -> RpcResult<Option<Order>> {
        self.inner.update_order(ctx, order).await
    }

    async fn delete_order(self, ctx: Context, id: String) -> RpcResult<bool> {
        self.faults.admit_delete()?;
        self.inner.delete_order(ctx, id).await
    }

    async fn list_orders(self, ctx: Context) -> RpcResult<Vec<Order>> {
        self.inner.list_orders(ctx).await
    }

    async fn create_product(self, ctx: Context, product: Product) -> RpcResult<Product> {
        self.faults.admit_create()?;
        self.inner.create_product(ctx, product).await
    }

    async fn get_product(self, ctx: Context, id: String) -> RpcResult<Option<Product>> {
        self.inner.get_product(ctx, id).await
    }

    async fn update_product(self, ctx: Context, product: Product) -> RpcResult<Option<Product>> {
        self.inner.update_product(ctx, product).await
    }

    async fn delete_product(self, ctx: Context, id: String) -> RpcResult<bool> {
        self.faults.admit_delete()?;
        self.inner.delete_product(ctx, id).await
    }

    async fn list_products(self, ctx: Context) -> RpcResult<Vec<Product>> {
        self.inner.list_products(ctx).await
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Starts workers as tasks in this process and keeps their stores visible.
#[derive(Clone, Default)]
struct InProcessLauncher {
    stores: Arc<Mutex<HashMap<u16, NodeStore>>>,
    faults: Arc<Mutex<HashMap<u16, Arc<Faults>>>>,
}

impl InProcessLauncher {
    /// Fault switches for the worker on `port`, including one not yet started.
    fn faults(&self, port: u16) -> Arc<Faults> {
        Arc::clone(self.faults.lock().unwrap().entry(port).or_default())
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(
        &self,
        _executable: &Path,
        port: u16,
    ) -> std::io::Result<Box<dyn WorkerProcess>> {
        let worker = TestWorker {
            inner: NodeServer::default(),
            faults: self.faults(port),
        };
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        self.stores
            .lock()
            .unwrap()
            .insert(port, worker.inner.store().clone());

        let serving = listener
            .filter_map(|r| future::ready(r.ok()))
            .map(BaseChannel::with_defaults)
            .for_each_concurrent(16, move |channel| {
                let server = worker.clone();
                channel.execute(server.serve()).for_each(spawn)
            });
        Ok(Box::new(InProcessWorker {
            handle: tokio::spawn(serving),
        }))
    }
}

struct InProcessWorker {
    handle: JoinHandle<()>,
}

#[async_trait]
impl WorkerProcess for InProcessWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.handle.abort();
        Ok(())
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        connect_retries: 10,
        connect_retry_delay_ms: 50,
        connect_timeout_ms: 1000,
        rpc_timeout_ms: 5000,
        max_fanout: 4,
        shutdown_grace_ms: 50,
        ..Default::default()
    }
}

struct Cluster {
    dispatcher: Arc<Dispatcher>,
    launcher: InProcessLauncher,
    /// Any existing file; the in-process launcher ignores it.
    executable: String,
}

impl Cluster {
    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn with_config(config: DispatcherConfig) -> Self {
        let launcher = InProcessLauncher::default();
        let dispatcher = Arc::new(
            Dispatcher::with_launcher(config, Arc::new(launcher.clone())).unwrap(),
        );
        let executable = std::env::current_exe()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        Self {
            dispatcher,
            launcher,
            executable,
        }
    }

    async fn add_node(&self) -> chash_proto::NodeCreated {
        self.add_node_on(free_port()).await.unwrap()
    }

    async fn add_node_on(&self, port: u16) -> Result<chash_proto::NodeCreated, DispatchError> {
        self.dispatcher
            .create_node(port, Some(&self.executable))
            .await
    }

    fn store(&self, port: u16) -> NodeStore {
        self.launcher.stores.lock().unwrap()[&port].clone()
    }

    /// Ports of the live workers holding a record with this id.
    async fn holders(&self, id: &str) -> Vec<u16> {
        let mut holders = Vec::new();
        for node in self.dispatcher.list_nodes().await {
            let store = self.store(node.port);
            if store.customers.get(id).await.is_some()
                || store.orders.get(id).await.is_some()
                || store.products.get(id).await.is_some()
            {
                holders.push(node.port);
            }
        }
        holders
    }

    async fn owner(&self, id: &str) -> NodeInfo {
        self.dispatcher
            .registry()
            .node_for_key(&ContentId::parse(id).unwrap())
            .await
            .unwrap()
    }

    /// Assert every id lives on exactly its ring owner.
    async fn assert_placed(&self, ids: &[String]) {
        for id in ids {
            let owner = self.owner(id).await;
            assert_eq!(
                self.holders(id).await,
                vec![owner.port],
                "record {} is not only on its owner {}",
                id,
                owner
            );
        }
    }

    /// Create a mix of customers, orders and products; return their ids.
    async fn populate(&self, count: usize) -> Vec<String> {
        let routers = self.dispatcher.routers();
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = match i % 3 {
                0 => routers
                    .customers
                    .create(customer(i))
                    .await
                    .unwrap()
                    .id,
                1 => routers
                    .orders
                    .create(NewOrder {
                        customer_id: format!("customer-{}", i),
                        total_amount: i as f64 * 1.5,
                    })
                    .await
                    .unwrap()
                    .id,
                _ => routers
                    .products
                    .create(product(i))
                    .await
                    .unwrap()
                    .id,
            };
            ids.push(id);
        }
        ids
    }

    async fn total_listed(&self) -> usize {
        let routers = self.dispatcher.routers();
        routers.customers.list_all().await.len()
            + routers.orders.list_all().await.len()
            + routers.products.list_all().await.len()
    }
}

fn customer(i: usize) -> NewCustomer {
    NewCustomer {
        full_name: format!("Customer {}", i),
        email: format!("customer{}@example.com", i),
        phone_number: format!("555-{:04}", i),
    }
}

fn product(i: usize) -> NewProduct {
    NewProduct {
        name: format!("product {}", i),
        price: 10.0 + i as f64,
        stock_quantity: i as u32,
    }
}

#[tokio::test]
async fn test_single_node_create_route_delete() {
    let cluster = Cluster::new();
    let created = cluster.add_node().await;
    assert_eq!(created.migrated, 0);

    let customers = &cluster.dispatcher.routers().customers;
    let stored = customers.create(customer(1)).await.unwrap();
    assert_eq!(stored.id.len(), 64);
    assert!(stored.created_at.is_some());
    assert_eq!(cluster.holders(&stored.id).await, vec![created.port]);

    let fetched = customers.get(&stored.id).await.unwrap();
    assert_eq!(fetched, stored);

    assert!(customers.delete(&stored.id).await.unwrap());
    assert!(!customers.delete(&stored.id).await.unwrap());
    assert!(matches!(
        customers.get(&stored.id).await,
        Err(DispatchError::EntityNotFound { .. })
    ));
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let cluster = Cluster::new();
    cluster.add_node().await;
    cluster.add_node().await;

    let products = &cluster.dispatcher.routers().products;
    let first = products.create(product(7)).await.unwrap();
    let second = products.create(product(7)).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(products.list_all().await.len(), 1);
    assert_eq!(cluster.holders(&first.id).await.len(), 1);
}

#[tokio::test]
async fn test_update_keeps_id_and_owner() {
    let cluster = Cluster::new();
    cluster.add_node().await;
    cluster.add_node().await;

    let orders = &cluster.dispatcher.routers().orders;
    let order = orders
        .create(NewOrder {
            customer_id: "c-1".into(),
            total_amount: 20.0,
        })
        .await
        .unwrap();
    let owner = cluster.owner(&order.id).await;

    let mut changed = order.clone();
    changed.total_amount = 99.5;
    changed.order_date = None;
    let updated = orders.update(changed).await.unwrap();

    assert_eq!(updated.id, order.id);
    assert_eq!(updated.total_amount, 99.5);
    assert_eq!(updated.order_date, order.order_date);
    assert_eq!(orders.get(&order.id).await.unwrap(), updated);
    assert_eq!(cluster.holders(&order.id).await, vec![owner.port]);
}

#[tokio::test]
async fn test_update_unknown_record_is_not_found() {
    let cluster = Cluster::new();
    cluster.add_node().await;

    let mut ghost = cluster
        .dispatcher
        .routers()
        .products
        .create(product(1))
        .await
        .unwrap();
    cluster
        .dispatcher
        .routers()
        .products
        .delete(&ghost.id)
        .await
        .unwrap();
    ghost.price = 1.0;

    assert!(matches!(
        cluster.dispatcher.routers().products.update(ghost).await,
        Err(DispatchError::EntityNotFound { .. })
    ));
}

#[tokio::test]
async fn test_empty_ring_is_unavailable() {
    let cluster = Cluster::new();
    let result = cluster
        .dispatcher
        .routers()
        .customers
        .create(customer(1))
        .await;
    assert!(matches!(result, Err(DispatchError::EmptyRing)));
    assert!(matches!(
        RpcError::from(result.unwrap_err()),
        RpcError::Unavailable(_)
    ));
}

#[tokio::test]
async fn test_create_node_moves_exactly_the_new_nodes_records() {
    let cluster = Cluster::new();
    cluster.add_node().await;
    let ids = cluster.populate(60).await;

    let created = cluster.add_node().await;
    let mut now_owned = 0;
    for id in &ids {
        if cluster.owner(id).await.node_id == created.node_id {
            now_owned += 1;
        }
    }

    assert!(now_owned > 0, "new node owns nothing out of 60 keys");
    assert_eq!(created.migrated, now_owned);
    cluster.assert_placed(&ids).await;
    assert_eq!(cluster.total_listed().await, ids.len());
}

#[tokio::test]
async fn test_third_node_only_takes_from_existing_nodes() {
    let cluster = Cluster::new();
    cluster.add_node().await;
    cluster.add_node().await;
    let ids = cluster.populate(45).await;

    let mut before = HashMap::new();
    for id in &ids {
        before.insert(id.clone(), cluster.owner(id).await.node_id);
    }

    let created = cluster.add_node().await;
    for id in &ids {
        let after = cluster.owner(id).await.node_id;
        if after != before[id] {
            assert_eq!(after, created.node_id);
        }
    }
    cluster.assert_placed(&ids).await;
}

#[tokio::test]
async fn test_delete_node_rehomes_every_record() {
    let cluster = Cluster::new();
    let first = cluster.add_node().await;
    cluster.add_node().await;
    cluster.add_node().await;
    let ids = cluster.populate(60).await;

    let held = cluster.store(first.port).total_records().await;
    let deleted = cluster.dispatcher.delete_node(&first.node_id).await.unwrap();

    assert_eq!(deleted.node_id, first.node_id);
    assert_eq!(deleted.migrated, held);
    assert!(cluster
        .dispatcher
        .list_nodes()
        .await
        .iter()
        .all(|n| n.node_id != first.node_id));
    assert_eq!(
        cluster.dispatcher.node_status(&first.node_id).await,
        Some(NodeStatus::Terminated)
    );

    cluster.assert_placed(&ids).await;
    assert_eq!(cluster.total_listed().await, ids.len());
    for id in &ids {
        assert_ne!(cluster.owner(id).await.node_id, first.node_id);
    }

    cluster.add_node().await;
    assert_eq!(cluster.dispatcher.node_status(&first.node_id).await, None);
}

#[tokio::test]
async fn test_delete_last_node_reports_dropped_records() {
    let cluster = Cluster::new();
    let only = cluster.add_node().await;
    cluster.populate(6).await;

    let deleted = cluster.dispatcher.delete_node(&only.node_id).await.unwrap();
    assert_eq!(deleted.migrated, 0);
    assert!(deleted.message.contains("aborted"));
    assert!(cluster.dispatcher.list_nodes().await.is_empty());
}

#[tokio::test]
async fn test_create_node_on_taken_port_keeps_records() {
    let cluster = Cluster::new();
    let first = cluster.add_node().await;
    let ids = cluster.populate(40).await;

    let result = cluster.add_node_on(first.port).await;
    assert!(matches!(
        result,
        Err(DispatchError::PortInUse { port, .. }) if port == first.port
    ));
    assert_eq!(cluster.dispatcher.list_nodes().await.len(), 1);
    assert_eq!(cluster.store(first.port).total_records().await, ids.len());
    cluster.assert_placed(&ids).await;
}

#[tokio::test]
async fn test_rebalance_never_moves_within_one_address() {
    let cluster = Cluster::new();
    let first = cluster.add_node().await;
    let ids = cluster.populate(30).await;

    // A second registration pointing at the same worker.
    cluster
        .dispatcher
        .registry()
        .add_node(NodeInfo::new("alias", first.port))
        .await;

    let summary = cluster.dispatcher.rebalance().await.unwrap();
    assert_eq!(summary.migrated, 0);
    assert_eq!(cluster.store(first.port).total_records().await, ids.len());
}

#[tokio::test]
async fn test_failed_migration_keeps_moves_and_rebalance_resumes() {
    let cluster = Cluster::new();
    cluster.add_node().await;
    let ids = cluster.populate(60).await;

    // The new worker accepts two writes, then refuses the rest.
    let port = free_port();
    let faults = cluster.launcher.faults(port);
    faults.allow_creates(Some(2));

    let created = cluster.add_node_on(port).await.unwrap();
    assert_eq!(created.migrated, 2);
    assert!(created.message.contains("aborted"), "{}", created.message);
    assert_eq!(cluster.store(port).total_records().await, 2);
    assert_eq!(cluster.total_listed().await, ids.len());
    for id in &ids {
        assert_eq!(cluster.holders(id).await.len(), 1, "record {} lost or doubled", id);
    }

    let mut now_owned = 0;
    for id in &ids {
        if cluster.owner(id).await.node_id == created.node_id {
            now_owned += 1;
        }
    }
    assert!(now_owned > 2);

    faults.allow_creates(None);
    let summary = cluster.dispatcher.rebalance().await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.migrated, now_owned - 2);
    cluster.assert_placed(&ids).await;
}

#[tokio::test]
async fn test_undeletable_source_leaves_stale_copies() {
    let cluster = Cluster::new();
    let first = cluster.add_node().await;
    let ids = cluster.populate(60).await;
    let faults = cluster.launcher.faults(first.port);
    faults.reject_deletes(true);

    let created = cluster.add_node().await;
    assert!(created.migrated > 0);
    assert!(
        created
            .message
            .contains(&format!("{} stale", created.migrated)),
        "{}",
        created.message
    );
    for id in &ids {
        let holders = cluster.holders(id).await;
        if cluster.owner(id).await.node_id == created.node_id {
            assert_eq!(holders.len(), 2);
        } else {
            assert_eq!(holders, vec![first.port]);
        }
    }

    faults.reject_deletes(false);
    let summary = cluster.dispatcher.rebalance().await.unwrap();
    assert_eq!(summary.migrated, created.migrated);
    assert_eq!(summary.stale, 0);
    cluster.assert_placed(&ids).await;
}

#[tokio::test]
async fn test_delete_unknown_node() {
    let cluster = Cluster::new();
    cluster.add_node().await;
    assert!(matches!(
        cluster.dispatcher.delete_node("no-such-node").await,
        Err(DispatchError::NodeNotFound(_))
    ));
    assert_eq!(cluster.dispatcher.list_nodes().await.len(), 1);
}

#[tokio::test]
async fn test_list_skips_unreachable_node() {
    let cluster = Cluster::with_config(DispatcherConfig {
        connect_retries: 1,
        connect_timeout_ms: 200,
        ..test_config()
    });
    cluster.add_node().await;
    let ids = cluster.populate(9).await;

    // Register a worker that is not listening.
    cluster
        .dispatcher
        .registry()
        .add_node(NodeInfo::new("unreachable", free_port()))
        .await;

    assert_eq!(cluster.total_listed().await, ids.len());
}

#[tokio::test]
async fn test_rebalance_moves_misplaced_records() {
    let cluster = Cluster::new();
    let a = cluster.add_node().await;
    let b = cluster.add_node().await;
    let ids = cluster.populate(30).await;

    // Plant a copy of some record on the node that does not own it.
    let id = &ids[0];
    let owner = cluster.owner(id).await;
    let wrong_port = if owner.port == a.port { b.port } else { a.port };
    let record = cluster.store(owner.port).customers.get(id).await.unwrap();
    cluster.store(owner.port).customers.delete(id).await;
    cluster.store(wrong_port).customers.create(record).await;
    assert_eq!(cluster.holders(id).await, vec![wrong_port]);

    let summary = cluster.dispatcher.rebalance().await.unwrap();
    assert_eq!(summary.migrated, 1);
    assert_eq!(summary.stale, 0);
    assert!(summary.is_complete());
    cluster.assert_placed(&ids).await;
}

#[tokio::test]
async fn test_shutdown_terminates_every_node() {
    let cluster = Cluster::new();
    let a = cluster.add_node().await;
    let b = cluster.add_node().await;

    let message = cluster.dispatcher.shutdown("test").await;
    assert!(message.contains("2 nodes"));
    assert!(cluster.dispatcher.list_nodes().await.is_empty());
    for node in [&a, &b] {
        assert_eq!(
            cluster.dispatcher.node_status(&node.node_id).await,
            Some(NodeStatus::Terminated)
        );
    }
}

#[tokio::test]
async fn test_client_round_trip_through_dispatcher_server() {
    let cluster = Cluster::new();
    let server = DispatcherServer::new(Arc::clone(&cluster.dispatcher));
    let (addr, run) = server
        .bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let serving = tokio::spawn(run);

    let client = connect_to_dispatcher(addr).await.unwrap();

    let missing = client
        .create_node(context::current(), free_port(), Some("/nonexistent/chash-node".into()))
        .await
        .unwrap();
    assert!(matches!(missing, Err(RpcError::NotFound(_))));

    let created = client
        .create_node(context::current(), free_port(), Some(cluster.executable.clone()))
        .await
        .unwrap()
        .unwrap();
    let nodes = client.list_nodes(context::current()).await.unwrap();
    assert_eq!(nodes, vec![NodeInfo::new(created.node_id.clone(), created.port)]);

    let stored = client
        .create_customer(context::current(), customer(3))
        .await
        .unwrap()
        .unwrap();
    let fetched = client
        .get_customer(context::current(), stored.id.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched, stored);

    let bad = client
        .get_customer(context::current(), "not-hex".into())
        .await
        .unwrap();
    assert!(matches!(bad, Err(RpcError::InvalidArgument(_))));

    let listed = client
        .list_customers(context::current())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listed.len(), 1);

    let message = client
        .shutdown(context::current(), "integration".into())
        .await
        .unwrap()
        .unwrap();
    assert!(message.contains("1 nodes"));

    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("dispatcher did not stop after shutdown")
        .unwrap();
}
