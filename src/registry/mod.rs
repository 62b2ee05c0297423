//! The process-wide namespace of pools.
//!
//! All pools known to the process live in one `PoolRegistry`. Its namespace
//! lock protects the name to pool mapping, every pool's baseline reference
//! count and the configuration cache. It is held across whole vdev
//! reconfiguration transactions, and it is what makes "find a pool by name
//! and take the first reference on it" a single atomic step.
//!
//! Lock order: a pool's vdev-top lock, then the namespace lock, then the
//! pool's configuration lock tiers.

use crate::config_cache::ConfigCache;
use crate::config_lock::LockMask;
use crate::configuration::Configuration;
use crate::feature::{FeatureActivation, FeatureMap, FeatureRegistry};
use crate::spa::{PoolServices, PoolState, Spa};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

mod errors;
mod vdev_txn;

pub use self::errors::*;
pub use self::vdev_txn::{VdevStateTransaction, VdevTransaction};

#[derive(Default)]
struct Namespace {
    pools: BTreeMap<String, Arc<Spa>>,
}

/// The set of pools known to this process.
pub struct PoolRegistry {
    namespace: Mutex<Namespace>,
    namespace_cv: Condvar,
    config: Configuration,
    config_cache: Arc<dyn ConfigCache>,
    features: FeatureRegistry,
}

impl PoolRegistry {
    /// Creates an empty registry.
    pub fn new(config: Configuration, config_cache: Arc<dyn ConfigCache>) -> Self {
        info!("pool registry initialized ({})", config);
        let features = FeatureRegistry::builtin()
            .clone()
            .with_checks_disabled(config.feature_checks_disable);
        PoolRegistry {
            namespace: Mutex::new(Namespace::default()),
            namespace_cv: Condvar::new(),
            config,
            config_cache,
            features,
        }
    }

    /// Creates an empty registry and opens the configuration cache named by
    /// `config`.
    pub fn from_configuration(config: Configuration) -> Result<Self> {
        let config_cache = config.open_config_cache()?;
        Ok(PoolRegistry::new(config, config_cache))
    }

    /// The configuration this registry was created with.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// The configuration cache.
    pub fn config_cache(&self) -> &dyn ConfigCache {
        &*self.config_cache
    }

    /// The features this registry checks pools against.
    pub fn features(&self) -> &FeatureRegistry {
        &self.features
    }

    /// Acquires the namespace lock.
    pub fn lock(&self) -> NamespaceGuard {
        NamespaceGuard {
            registry: self,
            ns: self.namespace.lock(),
        }
    }

    /// Starts a transaction that changes the vdev topology of `spa`.
    ///
    /// Blocks until no other topology change of the pool is in progress,
    /// then takes the namespace lock and every configuration lock tier of
    /// the pool as writer. The caller must not hold the namespace lock.
    pub fn vdev_enter<'a>(&'a self, spa: &'a Spa) -> VdevTransaction<'a> {
        VdevTransaction::enter(self, spa)
    }

    /// Starts a transaction that only changes vdev state, such as onlining
    /// or faulting a device. Takes `LockMask::STATE_ALL` plus `oplocks` as
    /// writer and does not take the namespace lock.
    pub fn vdev_state_enter<'a>(&'a self, spa: &'a Spa, oplocks: LockMask) -> VdevStateTransaction<'a> {
        VdevStateTransaction::enter(self, spa, oplocks)
    }

    /// Checks whether this build may open `spa`, read-only or read-write.
    pub fn check_features(&self, spa: &Spa, read_only: bool) -> Result<()> {
        let blocking: Vec<String> = FeatureActivation::new(spa, &self.features)
            .check_supported()?
            .into_iter()
            .filter(|feature| !read_only || feature.map == FeatureMap::ForRead)
            .map(|feature| {
                warn!(
                    "pool {} uses unsupported feature {} ({})",
                    spa.name(),
                    feature.guid,
                    feature.description
                );
                feature.guid
            })
            .collect();
        if blocking.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::UnsupportedFeatures(blocking).into())
        }
    }

    /// Removes every pool. Every reference beyond a pool's baseline must
    /// have been released.
    pub fn shutdown(&self) {
        let mut ns = self.lock();
        ns.evict_all();
        info!("pool registry shut down");
    }
}

fn is_name_delimiter(c: char) -> bool {
    c == '/' || c == '@' || c == '#'
}

fn check_pool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(is_name_delimiter) {
        bail!(ErrorKind::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Proof of holding the namespace lock. Dropping it releases the lock.
pub struct NamespaceGuard<'a> {
    registry: &'a PoolRegistry,
    ns: MutexGuard<'a, Namespace>,
}

impl<'a> NamespaceGuard<'a> {
    /// The registry this lock belongs to.
    pub fn registry(&self) -> &'a PoolRegistry {
        self.registry
    }

    /// Finds a pool by name. Anything from the first `/`, `@` or `#` on is
    /// ignored, so dataset, snapshot and bookmark names find their pool.
    pub fn lookup(&self, name: &str) -> Option<Arc<Spa>> {
        let end = name.find(is_name_delimiter).unwrap_or_else(|| name.len());
        self.ns.pools.get(&name[..end]).cloned()
    }

    /// Finds a pool by its guid.
    pub fn lookup_by_guid(&self, guid: u64) -> Option<Arc<Spa>> {
        if guid == 0 {
            return None;
        }
        self.ns
            .pools
            .values()
            .find(|spa| spa.guid() == guid)
            .cloned()
    }

    /// Inserts a new, uninitialized pool with no references.
    pub fn add(&mut self, name: &str, services: PoolServices) -> Result<Arc<Spa>> {
        check_pool_name(name)?;
        if self.ns.pools.contains_key(name) {
            bail!(ErrorKind::AlreadyExists(name.to_string()));
        }
        let spa = Arc::new(Spa::new(
            name,
            services,
            self.registry.config.reference_tracking,
        ));
        self.ns.pools.insert(name.to_string(), spa.clone());
        info!("pool {} added to namespace", name);
        Ok(spa)
    }

    /// Removes an uninitialized pool that nobody but the pool itself
    /// references and wakes up everyone waiting for a namespace change.
    pub fn remove(&mut self, spa: &Arc<Spa>) {
        assert_eq!(
            spa.state(),
            PoolState::Uninitialized,
            "pool {} removed while loaded",
            spa.name()
        );
        assert_eq!(
            spa.refcount(),
            spa.min_ref(),
            "pool {} removed while referenced by {:?}",
            spa.name(),
            spa.ref_holders()
        );
        let name = spa.name();
        let removed = self.ns.pools.remove(&name);
        debug_assert!(removed.map_or(false, |removed| Arc::ptr_eq(&removed, spa)));
        self.registry.namespace_cv.notify_all();
        info!("pool {} removed from namespace", name);
    }

    /// Renames a pool and updates the configuration cache.
    pub fn rename(&mut self, spa: &Arc<Spa>, new_name: &str) -> Result<()> {
        check_pool_name(new_name)?;
        if self.ns.pools.contains_key(new_name) {
            bail!(ErrorKind::AlreadyExists(new_name.to_string()));
        }
        let old_name = spa.name();
        let entry = match self.ns.pools.remove(&old_name) {
            Some(entry) => entry,
            None => return Err(ErrorKind::DoesNotExist(old_name).into()),
        };
        spa.set_name(new_name);
        self.ns.pools.insert(new_name.to_string(), entry);
        info!("pool {} renamed to {}", old_name, new_name);
        self.registry.config_cache.remove(&old_name)?;
        self.write_cachefile(spa)
    }

    /// The pool following `prev` in name order, or the first pool.
    pub fn next(&self, prev: Option<&Spa>) -> Option<Arc<Spa>> {
        match prev {
            None => self.ns.pools.values().next().cloned(),
            Some(prev) => self
                .ns
                .pools
                .range::<String, _>((Excluded(prev.name()), Unbounded))
                .next()
                .map(|(_, spa)| spa.clone()),
        }
    }

    /// All pools in name order.
    pub fn pools(&self) -> Vec<Arc<Spa>> {
        self.ns.pools.values().cloned().collect()
    }

    /// Number of pools.
    pub fn len(&self) -> usize {
        self.ns.pools.len()
    }

    /// Returns whether the namespace is empty.
    pub fn is_empty(&self) -> bool {
        self.ns.pools.is_empty()
    }

    /// Takes a reference on `spa`, possibly the first one above its baseline.
    pub fn open_ref(&self, spa: &Spa, tag: &str) {
        let count = spa.ref_add(tag);
        trace!("pool {} referenced by {} ({})", spa.name(), tag, count);
    }

    /// Drops a reference on `spa`, possibly the last one above its baseline.
    pub fn close(&self, spa: &Spa, tag: &str) {
        let count = spa.ref_remove(tag);
        trace!("pool {} released by {} ({})", spa.name(), tag, count);
    }

    /// Returns whether nobody but the pool itself holds a reference.
    pub fn is_unreferenced(&self, spa: &Spa) -> bool {
        spa.refcount() == spa.min_ref()
    }

    /// Declares the current references as the pool's own baseline. Called
    /// once loading has taken its internal references.
    pub fn set_min_ref(&self, spa: &Spa) {
        spa.set_min_ref(spa.refcount());
        debug!("pool {} baseline refcount {}", spa.name(), spa.min_ref());
    }

    /// Resets the baseline before the pool drops its own references.
    pub fn clear_min_ref(&self, spa: &Spa) {
        spa.set_min_ref(0);
    }

    /// Blocks until no pool named `name` exists. The namespace lock is
    /// released while waiting.
    pub fn wait_for_removal(&mut self, name: &str) {
        while self.ns.pools.contains_key(name) {
            self.registry.namespace_cv.wait(&mut self.ns);
        }
    }

    /// Writes the configuration of `spa` to the configuration cache, or
    /// removes it if the pool has been exported or destroyed.
    pub fn write_cachefile(&self, spa: &Spa) -> Result<()> {
        let cache = &self.registry.config_cache;
        match spa.state() {
            PoolState::Exported | PoolState::Destroyed => cache.remove(&spa.name())?,
            _ => cache.persist(&spa.to_pool_config())?,
        }
        debug!(
            "pool {} cached at generation {}",
            spa.name(),
            spa.config_generation()
        );
        Ok(())
    }

    /// Unloads and removes every pool. No pool may be referenced beyond
    /// its baseline.
    pub fn evict_all(&mut self) {
        while let Some(spa) = self.next(None) {
            spa.set_state(PoolState::Uninitialized);
            self.remove(&spa);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, PoolRegistry};
    use crate::config_cache::MemoryConfigCache;
    use crate::configuration::Configuration;
    use crate::config_lock::{LockMask, RwDirection};
    use crate::feature::{FeatureActivation, SpaFeature};
    use crate::spa::PoolState;
    use crate::store::{ObjectStore, Value};
    use crate::test::{registry, Services};
    use crate::txg::Tx;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lookup_strips_dataset_components() {
        let (registry, _) = registry();
        let mut ns = registry.lock();
        let tank = ns.add("tank", Services::new().pool_services()).unwrap();
        for name in ["tank", "tank/home", "tank@snap", "tank#mark", "tank/a@b"].iter() {
            assert!(Arc::ptr_eq(&ns.lookup(name).unwrap(), &tank), "{}", name);
        }
        assert!(ns.lookup("tan").is_none());
        assert!(ns.lookup("tank2").is_none());
        ns.remove(&tank);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (registry, _) = registry();
        let mut ns = registry.lock();
        ns.add("tank", Services::new().pool_services()).unwrap();
        match ns.add("tank", Services::new().pool_services()) {
            Err(e) => match e.kind() {
                ErrorKind::AlreadyExists(name) => assert_eq!(name, "tank"),
                other => panic!("unexpected error {:?}", other),
            },
            Ok(_) => panic!("duplicate pool added"),
        }
        ns.evict_all();
    }

    #[test]
    fn names_with_delimiters_are_rejected() {
        let (registry, _) = registry();
        let mut ns = registry.lock();
        for name in ["", "tank/home", "tank@snap", "tank#mark"].iter() {
            match ns.add(name, Services::new().pool_services()) {
                Err(e) => match e.kind() {
                    ErrorKind::InvalidName(rejected) => assert_eq!(rejected, *name),
                    other => panic!("unexpected error {:?}", other),
                },
                Ok(_) => panic!("pool {:?} added", name),
            }
        }
        assert!(ns.is_empty());

        let spa = ns.add("tank", Services::new().pool_services()).unwrap();
        assert!(ns.rename(&spa, "tank/data").is_err());
        assert!(Arc::ptr_eq(&ns.lookup("tank").unwrap(), &spa));
        ns.remove(&spa);
    }

    #[test]
    fn iteration_follows_name_order() {
        let (registry, _) = registry();
        let mut ns = registry.lock();
        for name in ["rpool", "backup", "tank"].iter() {
            ns.add(name, Services::new().pool_services()).unwrap();
        }
        let mut names = Vec::new();
        let mut cursor = ns.next(None);
        while let Some(spa) = cursor {
            names.push(spa.name());
            cursor = ns.next(Some(&spa));
        }
        assert_eq!(names, vec!["backup", "rpool", "tank"]);
        ns.evict_all();
        assert!(ns.is_empty());
    }

    #[test]
    fn rename_moves_cache_entry() {
        let (registry, cache) = registry();
        let mut ns = registry.lock();
        let spa = ns.add("tank", Services::new().pool_services()).unwrap();
        spa.set_guid(77);
        ns.write_cachefile(&spa).unwrap();
        ns.rename(&spa, "data").unwrap();
        assert!(ns.lookup("tank").is_none());
        assert!(Arc::ptr_eq(&ns.lookup("data").unwrap(), &spa));
        assert!(Arc::ptr_eq(&ns.lookup_by_guid(77).unwrap(), &spa));
        assert!(cache.get("tank").is_none());
        assert_eq!(cache.get("data").unwrap().pool_guid, 77);
        ns.remove(&spa);
    }

    #[test]
    fn exported_pools_leave_the_cache() {
        let (registry, cache) = registry();
        let mut ns = registry.lock();
        let spa = ns.add("tank", Services::new().pool_services()).unwrap();
        spa.set_state(PoolState::Active);
        ns.write_cachefile(&spa).unwrap();
        assert_eq!(cache.get("tank").unwrap().state, PoolState::Active);
        spa.set_state(PoolState::Exported);
        ns.write_cachefile(&spa).unwrap();
        assert!(cache.get("tank").is_none());
        ns.evict_all();
    }

    #[test]
    fn baseline_references() {
        let (registry, _) = registry();
        let mut ns = registry.lock();
        let spa = ns.add("tank", Services::new().pool_services()).unwrap();
        for _ in 0..5 {
            ns.open_ref(&spa, "load");
        }
        ns.set_min_ref(&spa);
        assert!(ns.is_unreferenced(&spa));

        ns.open_ref(&spa, "user");
        assert!(!ns.is_unreferenced(&spa));
        drop(ns);

        spa.open_ref("user");
        spa.close("user");
        assert_eq!(spa.refcount(), 6);

        let mut ns = registry.lock();
        ns.close(&spa, "user");
        assert!(ns.is_unreferenced(&spa));
        assert_eq!(spa.ref_holders(), vec![("load".to_string(), 5)]);
        ns.remove(&spa);
        assert!(ns.is_empty());
    }

    #[test]
    #[should_panic(expected = "without the namespace lock")]
    fn first_reference_needs_namespace_lock() {
        let (registry, _) = registry();
        let spa = registry
            .lock()
            .add("tank", Services::new().pool_services())
            .unwrap();
        spa.open_ref("user");
    }

    #[test]
    #[should_panic(expected = "removed while referenced")]
    fn remove_refuses_referenced_pool() {
        let (registry, _) = registry();
        let mut ns = registry.lock();
        let spa = ns.add("tank", Services::new().pool_services()).unwrap();
        ns.open_ref(&spa, "user");
        ns.remove(&spa);
    }

    #[test]
    fn wait_for_removal_wakes_up() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let spa = registry
            .lock()
            .add("tank", Services::new().pool_services())
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.lock().wait_for_removal("tank");
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        registry.lock().remove(&spa);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn concurrent_open_ref_counts_every_opener() {
        let (registry, _) = registry();
        let registry = Arc::new(registry);
        let spa = registry
            .lock()
            .add("tank", Services::new().pool_services())
            .unwrap();
        let openers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let ns = registry.lock();
                    let spa = ns.lookup("tank").unwrap();
                    ns.open_ref(&spa, "opener");
                })
            })
            .collect();
        for opener in openers {
            opener.join().unwrap();
        }
        assert_eq!(spa.refcount(), 8);
        for _ in 0..7 {
            spa.close("opener");
        }
        let mut ns = registry.lock();
        ns.close(&spa, "opener");
        ns.remove(&spa);
    }

    #[test]
    fn unsupported_features_block_import() {
        let (registry, _) = registry();
        let services = Services::new();
        let spa = registry.lock().add("tank", services.pool_services()).unwrap();

        spa.config_enter(LockMask::CONFIG, RwDirection::Reader);
        let tx = Tx::assigned(10);
        let features = FeatureActivation::builtin(&spa);
        let objects = features.create_feature_objects(&tx).unwrap();
        features.enable(SpaFeature::Lz4Compress, &tx).unwrap();
        spa.config_exit(LockMask::CONFIG);
        assert!(registry.check_features(&spa, false).is_ok());

        services
            .store
            .update(objects.for_write, "com.example:ro", Value::Count(1), &tx)
            .unwrap();
        assert!(registry.check_features(&spa, false).is_err());
        assert!(registry.check_features(&spa, true).is_ok());

        services
            .store
            .update(objects.for_read, "com.example:rw", Value::Count(1), &tx)
            .unwrap();
        match registry.check_features(&spa, true) {
            Err(e) => match e.kind() {
                ErrorKind::UnsupportedFeatures(guids) => {
                    assert_eq!(guids, &vec!["com.example:rw".to_string()])
                }
                other => panic!("unexpected error {:?}", other),
            },
            Ok(()) => panic!("unsupported feature not detected"),
        }
        registry.shutdown();
    }

    #[test]
    fn disabled_feature_checks_allow_import() {
        let config = Configuration {
            feature_checks_disable: true,
            reference_tracking: true,
            ..Configuration::default()
        };
        let registry = PoolRegistry::new(config, Arc::new(MemoryConfigCache::new()));
        assert!(registry.features().checks_disabled());
        let services = Services::new();
        let spa = registry.lock().add("tank", services.pool_services()).unwrap();

        spa.config_enter(LockMask::CONFIG, RwDirection::Reader);
        let tx = Tx::assigned(10);
        let objects = FeatureActivation::new(&spa, registry.features())
            .create_feature_objects(&tx)
            .unwrap();
        spa.config_exit(LockMask::CONFIG);
        services
            .store
            .update(objects.for_read, "com.example:rw", Value::Count(1), &tx)
            .unwrap();
        assert!(registry.check_features(&spa, false).is_ok());
        registry.shutdown();
    }
}
