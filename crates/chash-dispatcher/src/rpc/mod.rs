//! RPC layer for the dispatcher.
//!
//! - **Client**: connection helpers and the per-worker client cache
//! - **Server**: the `DispatcherService` implementation
//!
//! The service traits themselves live in `chash_proto`.

pub mod client;
pub mod server;

pub use client::{
    connect_to_dispatcher, connect_to_node_with_config, connect_to_node_with_retry, CallOutcome,
    ClientConfig, NodeClients,
};
pub use server::DispatcherServer;
