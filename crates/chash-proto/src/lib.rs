//! # CHash Proto
//!
//! Wire contract between the CHash dispatcher, its worker nodes and
//! external clients: entity records, node identity and the tarpc services.

pub mod protocol;
pub mod types;

pub use protocol::{
    DispatcherService, DispatcherServiceClient, NodeService, NodeServiceClient, RpcError,
    RpcResult,
};
pub use types::*;
