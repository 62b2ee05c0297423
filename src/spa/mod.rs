//! In-memory state of a single pool.
//!
//! A `Spa` is created and inserted into the namespace by the
//! `PoolRegistry`. It owns the pool's configuration lock, its reference
//! count and the bookkeeping that reconfiguration transactions and the
//! feature protocol update.

use crate::config_cache::PoolConfig;
use crate::config_lock::{ConfigLockSet, LockMask, RwDirection};
use crate::feature::{FeatureObjects, SPA_VERSION_FEATURES};
use crate::store::ObjectStore;
use crate::txg::{Tx, TxgSync, TXG_INITIAL};
use crate::vdev::{VdevId, VdevOps};
use parking_lot::{Mutex, RwLock};
use seqlock::SeqLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod refcount;

pub use self::refcount::RefCount;

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    /// Known to the namespace but not (or no longer) loaded.
    Uninitialized,
    /// Imported and in use.
    Active,
    /// Cleanly exported.
    Exported,
    /// Destroyed.
    Destroyed,
    /// Possibly in use by another host.
    PotentiallyActive,
    /// Could not be opened.
    Unavail,
}

/// Collaborators a pool delegates to.
#[derive(Clone)]
pub struct PoolServices {
    /// Epoch scheduler.
    pub txg: Arc<dyn TxgSync>,
    /// Vdev tree.
    pub vdevs: Arc<dyn VdevOps>,
    /// Metadata object set.
    pub store: Arc<dyn ObjectStore>,
}

impl PoolServices {
    /// Bundles the given collaborators.
    pub fn new(
        txg: Arc<dyn TxgSync>,
        vdevs: Arc<dyn VdevOps>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        PoolServices { txg, vdevs, store }
    }
}

/// A pool.
pub struct Spa {
    name: RwLock<String>,
    guid: AtomicU64,
    state: SeqLock<PoolState>,
    version: AtomicU64,
    refcount: RefCount,
    min_ref: AtomicU64,
    config_locks: ConfigLockSet,
    vdev_top_lock: Mutex<()>,
    pending_vdev: SeqLock<Option<VdevId>>,
    config_generation: AtomicU64,
    config_dirty: Mutex<BTreeSet<VdevId>>,
    label_features: Mutex<BTreeSet<String>>,
    feature_objects: SeqLock<Option<FeatureObjects>>,
    services: PoolServices,
}

impl Spa {
    pub(crate) fn new(name: &str, services: PoolServices, track_references: bool) -> Self {
        Spa {
            name: RwLock::new(name.to_string()),
            guid: AtomicU64::new(0),
            state: SeqLock::new(PoolState::Uninitialized),
            version: AtomicU64::new(SPA_VERSION_FEATURES),
            refcount: RefCount::new(track_references),
            min_ref: AtomicU64::new(0),
            config_locks: ConfigLockSet::new(),
            vdev_top_lock: Mutex::new(()),
            pending_vdev: SeqLock::new(None),
            config_generation: AtomicU64::new(0),
            config_dirty: Mutex::new(BTreeSet::new()),
            label_features: Mutex::new(BTreeSet::new()),
            feature_objects: SeqLock::new(None),
            services,
        }
    }

    /// The pool's name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    /// The pool's globally unique id, `0` if not yet known.
    pub fn guid(&self) -> u64 {
        self.guid.load(Ordering::Acquire)
    }

    /// Records the pool's globally unique id.
    pub fn set_guid(&self, guid: u64) {
        self.guid.store(guid, Ordering::Release);
    }

    /// Lifecycle state.
    pub fn state(&self) -> PoolState {
        self.state.read()
    }

    /// Changes the lifecycle state.
    pub fn set_state(&self, state: PoolState) {
        *self.state.lock_write() = state;
    }

    /// On-disk format version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Changes the on-disk format version.
    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::Release);
    }

    /// Current number of references.
    pub fn refcount(&self) -> u64 {
        self.refcount.count()
    }

    /// Holders of references if reference tracking is enabled.
    pub fn ref_holders(&self) -> Vec<(String, u64)> {
        self.refcount.holders()
    }

    /// Number of references the pool holds on itself while loaded.
    pub fn min_ref(&self) -> u64 {
        self.min_ref.load(Ordering::Acquire)
    }

    /// Takes an additional reference.
    ///
    /// Only valid while the caller already holds a reference. Taking the
    /// first reference above the baseline requires the namespace lock and
    /// goes through `NamespaceGuard::open_ref`.
    pub fn open_ref(&self, tag: &str) {
        assert!(
            self.refcount() > self.min_ref(),
            "pool {} referenced from its baseline without the namespace lock",
            self.name()
        );
        self.refcount.add(tag);
    }

    /// Drops a reference that is not the last one above the baseline.
    pub fn close(&self, tag: &str) {
        assert!(
            self.refcount() > self.min_ref(),
            "pool {} released below its baseline",
            self.name()
        );
        self.refcount.remove(tag);
    }

    /// Drops a reference from a context that cannot take the namespace lock.
    pub fn async_close(&self, tag: &str) {
        self.refcount.remove(tag);
    }

    pub(crate) fn ref_add(&self, tag: &str) -> u64 {
        self.refcount.add(tag)
    }

    pub(crate) fn ref_remove(&self, tag: &str) -> u64 {
        self.refcount.remove(tag)
    }

    pub(crate) fn set_min_ref(&self, min_ref: u64) {
        self.min_ref.store(min_ref, Ordering::Release);
    }

    /// The pool's configuration lock.
    pub fn config_locks(&self) -> &ConfigLockSet {
        &self.config_locks
    }

    /// Acquires `mask` of the configuration lock.
    pub fn config_enter(&self, mask: LockMask, rw: RwDirection) {
        self.config_locks.enter(mask, rw)
    }

    /// Acquires `mask` of the configuration lock for the liveness heartbeat.
    pub fn config_enter_priority(&self, mask: LockMask, rw: RwDirection) {
        self.config_locks.enter_priority(mask, rw)
    }

    /// Attempts to acquire `mask` of the configuration lock without blocking.
    pub fn config_try_enter(&self, mask: LockMask, rw: RwDirection) -> bool {
        self.config_locks.try_enter(mask, rw)
    }

    /// Releases `mask` of the configuration lock.
    pub fn config_exit(&self, mask: LockMask) {
        self.config_locks.exit(mask)
    }

    /// The subset of `mask` held in direction `rw`.
    pub fn config_held(&self, mask: LockMask, rw: RwDirection) -> LockMask {
        self.config_locks.held(mask, rw)
    }

    pub(crate) fn vdev_top_lock(&self) -> &Mutex<()> {
        &self.vdev_top_lock
    }

    /// Vdev currently being added or attached, if any.
    pub fn pending_vdev(&self) -> Option<VdevId> {
        self.pending_vdev.read()
    }

    /// Records the vdev currently being added or attached.
    pub fn set_pending_vdev(&self, vd: Option<VdevId>) {
        *self.pending_vdev.lock_write() = vd;
    }

    /// Generation of the pool configuration, bumped on every committed
    /// topology or state change.
    pub fn config_generation(&self) -> u64 {
        self.config_generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_config_generation(&self) -> u64 {
        self.config_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Marks the label configuration of `vd` as needing a rewrite.
    pub fn vdev_config_dirty(&self, vd: VdevId) {
        debug_assert!(
            !self
                .config_held(LockMask::CONFIG, RwDirection::Reader)
                .is_empty(),
            "vdev configuration dirtied without holding the config tier"
        );
        self.config_dirty.lock().insert(vd);
        self.services.vdevs.config_dirty(vd);
    }

    /// Marks the state of `vd` as needing a rewrite.
    pub fn vdev_state_dirty(&self, vd: VdevId) {
        self.services.vdevs.state_dirty(vd);
    }

    /// Vdevs whose label configuration awaits a rewrite.
    pub fn config_dirty_vdevs(&self) -> Vec<VdevId> {
        self.config_dirty.lock().iter().cloned().collect()
    }

    pub(crate) fn config_clean(&self) {
        self.config_dirty.lock().clear();
    }

    /// Features a reader must understand before it may open the pool at all.
    pub fn label_features(&self) -> Vec<String> {
        self.label_features.lock().iter().cloned().collect()
    }

    /// Records that opening the pool now requires `guid`.
    pub fn activate_mos_feature(&self, guid: &str, tx: &Tx) {
        let added = self.label_features.lock().insert(guid.to_string());
        if added {
            debug!("pool {} now requires {} to open", self.name(), guid);
            if tx.txg() != TXG_INITIAL {
                self.vdev_config_dirty(VdevId::ROOT);
            }
        }
    }

    /// Records that opening the pool no longer requires `guid`.
    pub fn deactivate_mos_feature(&self, guid: &str) {
        let removed = self.label_features.lock().remove(guid);
        if removed {
            debug!("pool {} no longer requires {} to open", self.name(), guid);
            self.vdev_config_dirty(VdevId::ROOT);
        }
    }

    /// The feature maps of this pool, if they have been created.
    pub fn feature_objects(&self) -> Option<FeatureObjects> {
        self.feature_objects.read()
    }

    /// Sets the feature maps, e.g. after loading them from disk.
    pub fn set_feature_objects(&self, objects: Option<FeatureObjects>) {
        *self.feature_objects.lock_write() = objects;
    }

    /// Collaborators of this pool.
    pub fn services(&self) -> &PoolServices {
        &self.services
    }

    /// The most recently committed transaction group.
    pub fn last_synced_txg(&self) -> u64 {
        self.services.txg.last_synced_txg()
    }

    /// Snapshot of the pool configuration as stored in the cache file.
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            name: self.name(),
            pool_guid: self.guid(),
            state: self.state(),
            version: self.version(),
            config_generation: self.config_generation(),
            features_for_read: self.label_features(),
        }
    }
}

impl fmt::Debug for Spa {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Spa")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("refcount", &self.refcount())
            .field("config_generation", &self.config_generation())
            .finish()
    }
}
