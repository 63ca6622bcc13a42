//! # CHash Node
//!
//! Worker process of a CHash cluster. A node keeps customers, orders and
//! products in memory and serves them over tarpc. It never decides where an
//! entity lives; the dispatcher routes every request to the owning node.

pub mod server;
pub mod store;

pub use server::NodeServer;
pub use store::{NodeStore, Table};
