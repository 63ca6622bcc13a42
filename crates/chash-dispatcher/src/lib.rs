//! # CHash Dispatcher
//!
//! A sharding dispatcher that routes customer, order and product CRUD to a
//! pool of worker processes by consistent hashing, and migrates records when
//! workers join or leave.

pub mod config;
pub mod coordinator;
pub mod hashing;
pub mod routing;
pub mod rpc;
pub mod types;

pub use config::{ConfigError, DispatcherConfig};
pub use coordinator::{
    Dispatcher, Migrator, NodeRegistry, ProcessLauncher, WorkerLauncher, WorkerProcess,
};
pub use hashing::{compute_id, key_hash_of, position_of, ContentId, HashRing};
pub use routing::{EntityRouter, Routed, Routers};
pub use rpc::{connect_to_dispatcher, ClientConfig, DispatcherServer, NodeClients};
pub use types::*;
