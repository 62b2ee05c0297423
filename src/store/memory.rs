use super::{ErrorKind, MapId, ObjectStore, Result, Value};
use crate::txg::Tx;
use parking_lot::Mutex;
use seqlock::SeqLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// How an operation of a `MemoryStore` behaves.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FailureMode {
    /// Operations succeed.
    NoFail,
    /// Operations fail with an I/O error.
    FailOperation,
}

#[derive(Debug, Default)]
struct Maps {
    maps: HashMap<MapId, BTreeMap<String, Value>>,
    next_id: u64,
}

/// An object store kept entirely in memory, with injectable failures.
#[derive(Debug)]
pub struct MemoryStore {
    maps: Mutex<Maps>,
    fail_reads: SeqLock<FailureMode>,
    fail_writes: SeqLock<FailureMode>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryStore {
            maps: Mutex::new(Maps {
                maps: HashMap::new(),
                next_id: 1,
            }),
            fail_reads: SeqLock::new(FailureMode::NoFail),
            fail_writes: SeqLock::new(FailureMode::NoFail),
            writes: AtomicU64::new(0),
        }
    }

    /// Makes subsequent reads behave according to `failure_mode`.
    pub fn fail_reads(&self, failure_mode: FailureMode) {
        *self.fail_reads.lock_write() = failure_mode;
    }

    /// Makes subsequent writes behave according to `failure_mode`.
    pub fn fail_writes(&self, failure_mode: FailureMode) {
        *self.fail_writes.lock_write() = failure_mode;
    }

    /// Number of successful modifications so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn check_read(&self) -> Result<()> {
        match self.fail_reads.read() {
            FailureMode::NoFail => Ok(()),
            FailureMode::FailOperation => Err(ErrorKind::Io("read failed".to_string()).into()),
        }
    }

    fn check_write(&self, tx: &Tx) -> Result<()> {
        debug_assert!(tx.is_assigned(), "write outside of an assigned transaction");
        match self.fail_writes.read() {
            FailureMode::NoFail => Ok(()),
            FailureMode::FailOperation => Err(ErrorKind::Io("write failed".to_string()).into()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl ObjectStore for MemoryStore {
    fn create_map(&self, tx: &Tx) -> Result<MapId> {
        self.check_write(tx)?;
        let mut maps = self.maps.lock();
        let id = MapId(maps.next_id);
        maps.next_id += 1;
        maps.maps.insert(id, BTreeMap::new());
        self.writes.fetch_add(1, Ordering::Relaxed);
        trace!("created map {:?} in txg {}", id, tx.txg());
        Ok(id)
    }

    fn lookup(&self, map: MapId, key: &str) -> Result<Option<Value>> {
        self.check_read()?;
        let maps = self.maps.lock();
        let entries = maps.maps.get(&map).ok_or(ErrorKind::NoSuchMap(map))?;
        Ok(entries.get(key).cloned())
    }

    fn update(&self, map: MapId, key: &str, value: Value, tx: &Tx) -> Result<()> {
        self.check_write(tx)?;
        let mut maps = self.maps.lock();
        let entries = maps.maps.get_mut(&map).ok_or(ErrorKind::NoSuchMap(map))?;
        entries.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, map: MapId, key: &str, tx: &Tx) -> Result<bool> {
        self.check_write(tx)?;
        let mut maps = self.maps.lock();
        let entries = maps.maps.get_mut(&map).ok_or(ErrorKind::NoSuchMap(map))?;
        let removed = entries.remove(key).is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    fn entries(&self, map: MapId) -> Result<Vec<(String, Value)>> {
        self.check_read()?;
        let maps = self.maps.lock();
        let entries = maps.maps.get(&map).ok_or(ErrorKind::NoSuchMap(map))?;
        Ok(entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
