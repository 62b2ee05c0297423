//! Key/value maps in the pool's metadata object set.
//!
//! Feature bookkeeping is stored in ordinary maps of the metadata object set.
//! Every change goes through a write transaction and becomes durable with
//! the transaction group the transaction is assigned to.

use crate::txg::Tx;

mod errors;
mod memory;

pub use self::errors::*;
pub use self::memory::{FailureMode, MemoryStore};

/// Identifies a map in the metadata object set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapId(pub u64);

/// A value stored in a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A single integer.
    Count(u64),
    /// A string.
    Text(String),
}

impl Value {
    /// Returns the integer or `WrongType` for any other value.
    pub fn into_count(self, key: &str) -> Result<u64> {
        match self {
            Value::Count(count) => Ok(count),
            Value::Text(_) => Err(ErrorKind::WrongType(key.to_string()).into()),
        }
    }

    /// Returns the string or `WrongType` for any other value.
    pub fn into_text(self, key: &str) -> Result<String> {
        match self {
            Value::Text(text) => Ok(text),
            Value::Count(_) => Err(ErrorKind::WrongType(key.to_string()).into()),
        }
    }
}

/// Transactional access to the maps of a pool.
pub trait ObjectStore: Send + Sync {
    /// Allocates a new, empty map.
    fn create_map(&self, tx: &Tx) -> Result<MapId>;

    /// Looks up `key`. A missing key is not an error.
    fn lookup(&self, map: MapId, key: &str) -> Result<Option<Value>>;

    /// Inserts or replaces `key`.
    fn update(&self, map: MapId, key: &str, value: Value, tx: &Tx) -> Result<()>;

    /// Removes `key` and reports whether it was present.
    fn remove(&self, map: MapId, key: &str, tx: &Tx) -> Result<bool>;

    /// All entries of `map`, ordered by key.
    fn entries(&self, map: MapId) -> Result<Vec<(String, Value)>>;

    /// Returns whether `key` is present.
    fn contains(&self, map: MapId, key: &str) -> Result<bool> {
        Ok(self.lookup(map, key)?.is_some())
    }
}
