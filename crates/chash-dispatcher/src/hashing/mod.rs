//! Content addressing and consistent hashing.
//!
//! Entity ids are SHA-256 digests of the canonical JSON form of their
//! creation request. The same digests place keys on the [`HashRing`]: the
//! first four bytes of a digest, read big-endian, are its ring position.
//!
//! Ring lookups only accept a [`ContentId`], so a key that is not a digest
//! cannot be routed by accident.

mod ring;

pub use ring::{HashRing, DEFAULT_VIRTUAL_NODES};

use crate::types::{DispatchError, DispatchResult};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A lowercase hex SHA-256 digest: an entity id or a ring key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    /// Length of a hex-encoded SHA-256 digest.
    pub const HEX_LEN: usize = 64;

    /// Validate a digest received from outside (a client or a worker).
    ///
    /// Upper-case hex is accepted and normalized to lower case.
    pub fn parse(raw: &str) -> DispatchResult<Self> {
        if raw.len() != Self::HEX_LEN || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DispatchError::InvalidId(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Hash raw bytes.
    pub fn digest(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// The digest as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the hex string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Ring position of this digest.
    pub fn position(&self) -> u32 {
        position_of(self)
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the content-addressed id of a value.
///
/// The value is first converted to a `serde_json::Value`, whose objects are
/// ordered maps, so the serialized bytes list keys in sorted order no matter
/// how the struct declares its fields. Equal logical content always yields
/// the same id.
pub fn compute_id<T: Serialize + ?Sized>(value: &T) -> DispatchResult<ContentId> {
    let canonical =
        serde_json::to_value(value).map_err(|e| DispatchError::Serialization(e.to_string()))?;
    let bytes =
        serde_json::to_vec(&canonical).map_err(|e| DispatchError::Serialization(e.to_string()))?;
    Ok(ContentId::digest(&bytes))
}

/// Ring position of a digest: its first 8 hex characters as a big-endian u32.
pub fn position_of(id: &ContentId) -> u32 {
    id.0
        .bytes()
        .take(8)
        .fold(0u32, |acc, b| (acc << 4) | hex_value(b))
}

/// Ring position of an arbitrary value's content id.
pub fn key_hash_of<T: Serialize + ?Sized>(value: &T) -> DispatchResult<u32> {
    compute_id(value).map(|id| id.position())
}

/// Digest naming replica `index` of a node on the ring.
pub(crate) fn replica_id(node_id: &str, index: u32) -> ContentId {
    ContentId::digest(format!("{}#{}", node_id, index).as_bytes())
}

fn hex_value(b: u8) -> u32 {
    match b {
        b'0'..=b'9' => (b - b'0') as u32,
        b'a'..=b'f' => (b - b'a' + 10) as u32,
        b'A'..=b'F' => (b - b'A' + 10) as u32,
        _ => 0,
    }
}
