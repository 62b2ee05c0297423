//! Persistent cache of pool configurations.
//!
//! After every committed topology or state change the configuration of the
//! affected pool is written to the cache, so the pool can be found again
//! without scanning all devices.

use crate::spa::PoolState;

mod errors;
mod file;
mod memory;

pub use self::errors::*;
pub use self::file::FileConfigCache;
pub use self::memory::MemoryConfigCache;

/// The cached configuration of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name.
    pub name: String,
    /// Globally unique pool id.
    pub pool_guid: u64,
    /// Lifecycle state at the time of writing.
    pub state: PoolState,
    /// On-disk format version.
    pub version: u64,
    /// Configuration generation at the time of writing.
    pub config_generation: u64,
    /// Features a reader must understand to open the pool.
    pub features_for_read: Vec<String>,
}

/// Storage for cached pool configurations.
pub trait ConfigCache: Send + Sync {
    /// Stores `config`, replacing any previous entry of the same pool.
    fn persist(&self, config: &PoolConfig) -> Result<()>;

    /// Drops the entry of pool `name`.
    fn remove(&self, name: &str) -> Result<()>;

    /// All cached configurations, ordered by pool name.
    fn configs(&self) -> Result<Vec<PoolConfig>>;
}
