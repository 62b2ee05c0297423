use super::{ConfigCache, ErrorKind, PoolConfig, Result};
use parking_lot::Mutex;
use seqlock::SeqLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A configuration cache that lives only as long as the process.
#[derive(Debug)]
pub struct MemoryConfigCache {
    configs: Mutex<BTreeMap<String, PoolConfig>>,
    fail_writes: SeqLock<bool>,
    writes: AtomicU64,
}

impl MemoryConfigCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        MemoryConfigCache {
            configs: Mutex::new(BTreeMap::new()),
            fail_writes: SeqLock::new(false),
            writes: AtomicU64::new(0),
        }
    }

    /// Makes subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock_write() = fail;
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// The cached configuration of pool `name`.
    pub fn get(&self, name: &str) -> Option<PoolConfig> {
        self.configs.lock().get(name).cloned()
    }
}

impl Default for MemoryConfigCache {
    fn default() -> Self {
        MemoryConfigCache::new()
    }
}

impl ConfigCache for MemoryConfigCache {
    fn persist(&self, config: &PoolConfig) -> Result<()> {
        if self.fail_writes.read() {
            bail!(ErrorKind::WriteFailed(config.name.clone()));
        }
        self.configs
            .lock()
            .insert(config.name.clone(), config.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        if self.fail_writes.read() {
            bail!(ErrorKind::WriteFailed(name.to_string()));
        }
        if self.configs.lock().remove(name).is_some() {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn configs(&self) -> Result<Vec<PoolConfig>> {
        Ok(self.configs.lock().values().cloned().collect())
    }
}
