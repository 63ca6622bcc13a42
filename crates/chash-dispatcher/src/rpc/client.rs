//! tarpc client utilities.
//!
//! Connection helpers for reaching workers and the dispatcher, with retry,
//! plus [`NodeClients`], the dispatcher's cache of per-worker clients.

use crate::types::{DispatchError, DispatchResult};
use chash_proto::{DispatcherServiceClient, NodeInfo, NodeServiceClient, RpcResult};
use futures::Future;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tarpc::client::Config;
use tarpc::context::{self, Context};
use tokio::net::ToSocketAddrs;
use tokio::sync::RwLock;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, warn};

/// Default connection timeout in milliseconds.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Default number of connection attempts.
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Default per-call deadline in milliseconds.
const DEFAULT_RPC_TIMEOUT_MS: u64 = 5000;

/// What a single tarpc call to a worker yields: a transport-level failure,
/// or the worker's own result.
pub type CallOutcome<T> = Result<RpcResult<T>, tarpc::client::RpcError>;

/// Configuration for client connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Number of connection attempts.
    pub retry_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Deadline applied to every call.
    pub rpc_timeout: Duration,
    /// Maximum pending requests per client.
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            max_pending_requests: 100,
        }
    }
}

impl ClientConfig {
    /// A fresh call context whose deadline is `rpc_timeout` from now.
    pub fn context(&self) -> Context {
        let mut ctx = context::current();
        ctx.deadline = SystemTime::now() + self.rpc_timeout;
        ctx
    }

    fn tarpc_config(&self) -> Config {
        let mut config = Config::default();
        config.max_in_flight_requests = self.max_pending_requests;
        config
    }
}

/// Create a client connection to a worker node.
///
/// # Errors
///
/// Returns an error if the connection cannot be established within
/// `config.connect_timeout`.
pub async fn connect_to_node_with_config<A>(
    addr: A,
    config: &ClientConfig,
) -> Result<NodeServiceClient, std::io::Error>
where
    A: ToSocketAddrs + std::fmt::Display,
{
    debug!("Connecting to node at {}", addr);

    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(&addr, Bincode::default),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"))??;

    let client = NodeServiceClient::new(config.tarpc_config(), transport).spawn();
    info!("Connected to node at {}", addr);
    Ok(client)
}

/// Connect to a worker node with automatic retry on failure.
///
/// A freshly spawned worker needs a moment before it accepts connections,
/// so the first attempts are expected to fail.
///
/// # Errors
///
/// Returns the last connection error if all attempts fail.
pub async fn connect_to_node_with_retry<A>(
    addr: A,
    config: &ClientConfig,
) -> Result<NodeServiceClient, std::io::Error>
where
    A: ToSocketAddrs + std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 0..config.retry_attempts {
        if attempt > 0 {
            debug!("Retry attempt {} connecting to node at {}", attempt + 1, addr);
            tokio::time::sleep(config.retry_delay).await;
        }

        match connect_to_node_with_config(&addr, config).await {
            Ok(client) => {
                if attempt > 0 {
                    info!(
                        "Connected to node at {} after {} attempts",
                        addr,
                        attempt + 1
                    );
                }
                return Ok(client);
            }
            Err(e) => {
                warn!("Failed to connect to node at {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    error!(
        "Failed to connect to node at {} after {} attempts",
        addr, config.retry_attempts
    );
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "connection failed")
    }))
}

/// Create a client connection to the dispatcher.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_to_dispatcher<A>(addr: A) -> Result<DispatcherServiceClient, std::io::Error>
where
    A: ToSocketAddrs + std::fmt::Display,
{
    debug!("Connecting to dispatcher at {}", addr);
    let transport = tarpc::serde_transport::tcp::connect(&addr, Bincode::default).await?;
    let client = DispatcherServiceClient::new(Config::default(), transport).spawn();
    info!("Connected to dispatcher at {}", addr);
    Ok(client)
}

/// Cached clients for the registered workers, keyed by node id.
///
/// Clients are created lazily and reused. A client whose connection failed
/// is evicted so the next call reconnects.
pub struct NodeClients {
    /// Host every worker listens on.
    host: String,
    /// Cached client connections.
    clients: RwLock<HashMap<String, NodeServiceClient>>,
    /// Client configuration.
    config: ClientConfig,
}

impl NodeClients {
    /// Create an empty pool for workers on `host`.
    pub fn new(host: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            host: host.into(),
            clients: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// The pool's client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get a client for `node`, connecting if none is cached.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ConnectFailed`] if every attempt fails.
    pub async fn client_for(&self, node: &NodeInfo) -> DispatchResult<NodeServiceClient> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&node.node_id) {
                return Ok(client.clone());
            }
        }

        let addr = node.socket_addr(&self.host);
        let client = connect_to_node_with_retry(addr.as_str(), &self.config)
            .await
            .map_err(|e| DispatchError::ConnectFailed {
                node: node.node_id.clone(),
                reason: e.to_string(),
            })?;

        let mut clients = self.clients.write().await;
        // Another task may have connected meanwhile; keep the first client.
        let client = clients
            .entry(node.node_id.clone())
            .or_insert(client)
            .clone();
        Ok(client)
    }

    /// Drop the cached client for a node.
    pub async fn forget(&self, node_id: &str) {
        if self.clients.write().await.remove(node_id).is_some() {
            debug!("Dropped client for node {}", node_id);
        }
    }

    /// Issue one call to `node` and classify the outcome.
    ///
    /// `call` receives a client and a context carrying the configured
    /// deadline. Errors reported by the worker become
    /// [`DispatchError::Downstream`]; transport failures evict the cached
    /// client.
    pub async fn call<T, F, Fut>(&self, node: &NodeInfo, call: F) -> DispatchResult<T>
    where
        F: FnOnce(NodeServiceClient, Context) -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let client = self.client_for(node).await?;
        match call(client, self.config.context()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(DispatchError::Downstream {
                node: node.node_id.clone(),
                error,
            }),
            Err(tarpc::client::RpcError::DeadlineExceeded) => {
                warn!("Call to node {} exceeded its deadline", node);
                Err(DispatchError::DeadlineExceeded {
                    node: node.node_id.clone(),
                })
            }
            Err(e) => {
                warn!("Call to node {} failed: {}", node, e);
                self.forget(&node.node_id).await;
                Err(DispatchError::TransportFailed {
                    node: node.node_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Number of cached clients.
    pub async fn cached(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(2000));
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.rpc_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_context_deadline() {
        let config = ClientConfig {
            rpc_timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let ctx = config.context();
        assert!(ctx.deadline <= SystemTime::now() + Duration::from_millis(250));
        assert!(ctx.deadline > SystemTime::now());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let pool = NodeClients::new(
            "127.0.0.1",
            ClientConfig {
                retry_attempts: 2,
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let result = pool.client_for(&NodeInfo::new("gone", port)).await;
        assert!(matches!(result, Err(DispatchError::ConnectFailed { .. })));
        assert_eq!(pool.cached().await, 0);
    }
}
