use super::{NamespaceGuard, PoolRegistry, Result};
use crate::config_lock::{LockMask, RwDirection};
use crate::spa::Spa;
use crate::vdev::VdevId;
use parking_lot::MutexGuard;

/// A change of a pool's vdev topology, e.g. adding, attaching, detaching or
/// removing a device.
///
/// While the transaction is open it holds the pool's vdev-top lock, the
/// namespace lock and, between `config_enter` and `config_exit`, every
/// configuration lock tier as writer. Long running changes can release the
/// configuration lock in between to let I/O drain while still excluding all
/// other reconfigurations.
///
/// A transaction must be finished with `exit`, also when the change failed.
/// Dropping it unfinished treats the change as failed: automatic trimming is
/// restarted and the configuration lock is released without committing.
#[must_use]
pub struct VdevTransaction<'a> {
    spa: &'a Spa,
    namespace: NamespaceGuard<'a>,
    _vdev_top: MutexGuard<'a, ()>,
    txg: u64,
    config_held: bool,
    finished: bool,
}

impl<'a> VdevTransaction<'a> {
    pub(super) fn enter(registry: &'a PoolRegistry, spa: &'a Spa) -> Self {
        let vdev_top = spa.vdev_top_lock().lock();
        let namespace = registry.lock();
        spa.services().vdevs.stop_autotrim();
        let mut txn = VdevTransaction {
            spa,
            namespace,
            _vdev_top: vdev_top,
            txg: 0,
            config_held: false,
            finished: false,
        };
        txn.config_enter();
        debug!("pool {} vdev transaction in txg {}", spa.name(), txn.txg);
        txn
    }

    /// The pool being reconfigured.
    pub fn spa(&self) -> &'a Spa {
        self.spa
    }

    /// The transaction group the change will be committed in.
    pub fn txg(&self) -> u64 {
        self.txg
    }

    /// The namespace lock held by this transaction.
    pub fn namespace(&mut self) -> &mut NamespaceGuard<'a> {
        &mut self.namespace
    }

    /// Takes every configuration lock tier as writer and returns the
    /// transaction group following the last committed one.
    pub fn config_enter(&mut self) -> u64 {
        assert!(!self.config_held, "config lock of vdev transaction entered twice");
        self.spa.config_enter(LockMask::ALL, RwDirection::Writer);
        self.config_held = true;
        self.txg = self.spa.last_synced_txg() + 1;
        self.txg
    }

    /// Releases the configuration lock and commits the change.
    ///
    /// Unless `failed` is set, a non-empty set of dirty vdev configurations
    /// bumps the configuration generation, and the call blocks until `txg`
    /// is durable. A vdev that left the tree is freed afterwards, under a
    /// fresh writer claim of every tier. Finally a changed configuration is
    /// written to the configuration cache, whose result is returned.
    pub fn config_exit(&mut self, vd: Option<VdevId>, txg: u64, failed: bool) -> Result<()> {
        assert!(
            self.config_held,
            "vdev transaction released a config lock it does not hold"
        );
        let spa = self.spa;
        let services = spa.services();
        assert!(
            txg > spa.last_synced_txg(),
            "vdev transaction committing txg {} which is already synced",
            txg
        );

        spa.set_pending_vdev(None);
        services.vdevs.reassess_dirty_regions(VdevId::ROOT);

        let config_changed = !failed && !spa.config_dirty_vdevs().is_empty();
        if config_changed {
            let generation = spa.bump_config_generation();
            info!(
                "pool {} configuration generation {} in txg {}",
                spa.name(),
                generation,
                txg
            );
        }

        spa.config_exit(LockMask::ALL);
        self.config_held = false;

        if !failed {
            services.txg.wait_synced(txg);
            spa.config_clean();
        }

        if let Some(vd) = vd {
            assert!(
                !services.vdevs.is_detached(vd) || !services.vdevs.has_dirty_region_map(vd),
                "detached vdev {:?} still has a dirty region map",
                vd
            );
            if services.vdevs.is_leaf(vd) {
                services.vdevs.stop_maintenance(vd);
            }
            spa.config_enter(LockMask::ALL, RwDirection::Writer);
            services.vdevs.free(vd);
            spa.config_exit(LockMask::ALL);
            debug!("pool {} freed vdev {:?}", spa.name(), vd);
        }

        if config_changed {
            self.namespace.write_cachefile(spa)
        } else {
            Ok(())
        }
    }

    /// Finishes the transaction and releases all its locks.
    ///
    /// A failed `result` is returned unchanged. Otherwise the outcome of
    /// writing the configuration cache is returned.
    pub fn exit<T>(mut self, vd: Option<VdevId>, result: Result<T>) -> Result<T> {
        self.finished = true;
        let spa = self.spa;
        spa.services().vdevs.restart_autotrim();
        let txg = self.txg;
        let persisted = self.config_exit(vd, txg, result.is_err());
        // Releases the namespace lock, then the vdev-top lock.
        drop(self);

        match result {
            Err(e) => {
                if let Err(cache_err) = persisted {
                    warn!(
                        "pool {} failed to update the configuration cache: {}",
                        spa.name(),
                        cache_err
                    );
                }
                Err(e)
            }
            Ok(value) => persisted.map(|()| value),
        }
    }
}

impl<'a> Drop for VdevTransaction<'a> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let spa = self.spa;
        warn!(
            "pool {} vdev transaction in txg {} dropped without exit",
            spa.name(),
            self.txg
        );
        let vdevs = &spa.services().vdevs;
        vdevs.restart_autotrim();
        if self.config_held {
            spa.set_pending_vdev(None);
            vdevs.reassess_dirty_regions(VdevId::ROOT);
            spa.config_exit(LockMask::ALL);
            self.config_held = false;
        }
    }
}

/// A change of vdev state that leaves the topology untouched, e.g. onlining,
/// offlining or faulting a device.
///
/// Holds `LockMask::STATE_ALL` plus the requested extra tiers as writer.
/// Must be finished with `exit`, and the caller must not hold the namespace
/// lock while doing so. Dropping it unfinished releases the tiers without
/// marking anything dirty.
#[must_use]
pub struct VdevStateTransaction<'a> {
    registry: &'a PoolRegistry,
    spa: &'a Spa,
    locks: LockMask,
    held: bool,
}

impl<'a> VdevStateTransaction<'a> {
    pub(super) fn enter(registry: &'a PoolRegistry, spa: &'a Spa, oplocks: LockMask) -> Self {
        let locks = LockMask::STATE_ALL | oplocks;
        spa.config_enter(locks, RwDirection::Writer);
        trace!("pool {} vdev state transaction {:?}", spa.name(), locks);
        VdevStateTransaction {
            registry,
            spa,
            locks,
            held: true,
        }
    }

    /// The configuration lock tiers held.
    pub fn locks(&self) -> LockMask {
        self.locks
    }

    /// Finishes the transaction.
    ///
    /// If `vd` changed state, its top-level vdev is marked dirty, the
    /// configuration generation is bumped and the call waits for the open
    /// transaction group to commit before updating the configuration cache.
    pub fn exit<T>(mut self, vd: Option<VdevId>, result: Result<T>) -> Result<T> {
        let spa = self.spa;
        let vdevs = &spa.services().vdevs;
        let top = vd.map_or(VdevId::ROOT, |vd| vdevs.top_level(vd));

        if vd.is_some() || result.is_ok() {
            vdevs.reassess_dirty_regions(top);
        }

        let config_changed = vd.is_some();
        if config_changed {
            if !top.is_root() {
                spa.vdev_state_dirty(top);
            }
            let generation = spa.bump_config_generation();
            debug!(
                "pool {} state of {:?} changed, generation {}",
                spa.name(),
                top,
                generation
            );
        }

        spa.config_exit(self.locks);
        self.held = false;

        if config_changed {
            spa.services().txg.wait_synced(0);
        }

        let persisted = if config_changed {
            self.registry.lock().write_cachefile(spa)
        } else {
            Ok(())
        };

        match result {
            Err(e) => Err(e),
            Ok(value) => persisted.map(|()| value),
        }
    }
}

impl<'a> Drop for VdevStateTransaction<'a> {
    fn drop(&mut self) {
        if self.held {
            warn!(
                "pool {} vdev state transaction dropped without exit",
                self.spa.name()
            );
            self.spa.config_exit(self.locks);
            self.held = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config_lock::{LockMask, RwDirection, Tier};
    use crate::registry::{Error, ErrorKind, Result};
    use crate::spa::PoolState;
    use crate::test::{registry, Services};
    use crate::txg::TxgSync;
    use crate::vdev::{VdevEvent, VdevId};
    use std::sync::Arc;
    use std::thread;

    fn pool() -> (
        crate::registry::PoolRegistry,
        Arc<crate::config_cache::MemoryConfigCache>,
        Services,
        Arc<crate::spa::Spa>,
    ) {
        let (registry, cache) = registry();
        let services = Services::new();
        services.vdevs.add(VdevId(1), VdevId::ROOT, false);
        services.vdevs.add(VdevId(2), VdevId(1), true);
        services.vdevs.add(VdevId(3), VdevId(1), true);
        let spa = registry.lock().add("tank", services.pool_services()).unwrap();
        spa.set_state(PoolState::Active);
        (registry, cache, services, spa)
    }

    fn teardown(registry: crate::registry::PoolRegistry, spa: &crate::spa::Spa) {
        spa.set_state(PoolState::Uninitialized);
        registry.shutdown();
    }

    #[test]
    fn enter_holds_every_tier_as_writer() {
        let (registry, _, services, spa) = pool();
        let txn = registry.vdev_enter(&spa);
        assert_eq!(txn.txg(), services.txg.last_synced_txg() + 1);
        assert_eq!(spa.config_held(LockMask::ALL, RwDirection::Writer), LockMask::ALL);
        let other = {
            let spa = spa.clone();
            thread::spawn(move || spa.config_try_enter(LockMask::VDEV, RwDirection::Reader))
        };
        assert!(!other.join().unwrap());
        txn.exit(None, Ok(())).unwrap();

        assert!(spa.config_held(LockMask::ALL, RwDirection::Reader).is_empty());
        let events = services.vdevs.take_events();
        assert_eq!(events.first(), Some(&VdevEvent::AutotrimStopped));
        assert!(events.contains(&VdevEvent::AutotrimRestarted));
        teardown(registry, &spa);
    }

    #[test]
    fn successful_change_is_committed_and_cached() {
        let (registry, cache, services, spa) = pool();
        let generation = spa.config_generation();
        let txn = registry.vdev_enter(&spa);
        let txg = txn.txg();
        spa.set_pending_vdev(Some(VdevId(3)));
        spa.vdev_config_dirty(VdevId(1));
        txn.exit(None, Ok(())).unwrap();

        assert_eq!(spa.config_generation(), generation + 1);
        assert_eq!(services.txg.waits(), vec![txg]);
        assert!(services.txg.last_synced_txg() >= txg);
        assert_eq!(spa.pending_vdev(), None);
        assert!(spa.config_dirty_vdevs().is_empty());
        assert_eq!(cache.get("tank").unwrap().config_generation, generation + 1);
        teardown(registry, &spa);
    }

    #[test]
    fn failed_change_skips_commit() {
        let (registry, cache, services, spa) = pool();
        let generation = spa.config_generation();
        let txn = registry.vdev_enter(&spa);
        spa.vdev_config_dirty(VdevId(1));
        let result: Result<()> = Err(Error::from(ErrorKind::DoesNotExist("c1d0".to_string())));
        match txn.exit(None, result) {
            Err(e) => match e.kind() {
                ErrorKind::DoesNotExist(name) => assert_eq!(name, "c1d0"),
                other => panic!("unexpected error {:?}", other),
            },
            Ok(()) => panic!("failed change reported success"),
        }

        assert_eq!(spa.config_generation(), generation);
        assert!(services.txg.waits().is_empty());
        assert_eq!(cache.writes(), 0);
        assert!(spa.config_held(LockMask::ALL, RwDirection::Reader).is_empty());
        teardown(registry, &spa);
    }

    #[test]
    fn unchanged_config_is_not_cached() {
        let (registry, cache, services, spa) = pool();
        let txn = registry.vdev_enter(&spa);
        let txg = txn.txg();
        assert_eq!(txn.exit(None, Ok(7)).unwrap(), 7);
        assert_eq!(services.txg.waits(), vec![txg]);
        assert_eq!(cache.writes(), 0);
        teardown(registry, &spa);
    }

    #[test]
    fn removed_vdev_is_freed_after_commit() {
        let (registry, _, services, spa) = pool();
        let txn = registry.vdev_enter(&spa);
        services.vdevs.detach(VdevId(3));
        spa.vdev_config_dirty(VdevId(1));
        txn.exit(Some(VdevId(3)), Ok(())).unwrap();

        let events = services.vdevs.take_events();
        let stopped = events
            .iter()
            .position(|e| *e == VdevEvent::MaintenanceStopped(VdevId(3)))
            .unwrap();
        let freed = events
            .iter()
            .position(|e| *e == VdevEvent::Freed(VdevId(3)))
            .unwrap();
        assert!(stopped < freed);
        assert!(!services.vdevs.contains(VdevId(3)));
        teardown(registry, &spa);
    }

    #[test]
    #[should_panic(expected = "still has a dirty region map")]
    fn detached_vdev_with_dirty_regions_panics() {
        let (registry, _, services, spa) = pool();
        let txn = registry.vdev_enter(&spa);
        services.vdevs.detach(VdevId(2));
        services.vdevs.set_dirty_region_map(VdevId(2), true);
        let _ = txn.exit(Some(VdevId(2)), Ok(()));
    }

    #[test]
    fn multi_phase_change_lets_io_drain() {
        let (registry, _, services, spa) = pool();
        let mut txn = registry.vdev_enter(&spa);
        let first = txn.txg();
        spa.vdev_config_dirty(VdevId(1));
        txn.config_exit(None, first, false).unwrap();

        // Readers get in between the phases, other reconfigurations don't.
        assert!(spa.config_try_enter(LockMask::ZIO, RwDirection::Reader));
        spa.config_exit(LockMask::ZIO);
        assert!(spa.vdev_top_lock().try_lock().is_none());

        let second = txn.config_enter();
        assert!(second > first);
        spa.vdev_config_dirty(VdevId(1));
        txn.exit(None, Ok(())).unwrap();
        assert_eq!(services.txg.waits(), vec![first, second]);
        assert_eq!(spa.config_generation(), 2);
        teardown(registry, &spa);
    }

    #[test]
    fn cache_failure_is_reported_after_release() {
        let (registry, cache, _, spa) = pool();
        cache.fail_writes(true);
        let txn = registry.vdev_enter(&spa);
        spa.vdev_config_dirty(VdevId(1));
        match txn.exit(None, Ok(())) {
            Err(e) => match e.kind() {
                ErrorKind::ConfigCacheError(_) => {}
                other => panic!("unexpected error {:?}", other),
            },
            Ok(()) => panic!("cache failure not reported"),
        }
        assert!(spa.config_held(LockMask::ALL, RwDirection::Reader).is_empty());
        assert!(spa.vdev_top_lock().try_lock().is_some());
        cache.fail_writes(false);
        teardown(registry, &spa);
    }

    #[test]
    fn dropped_transaction_releases_every_lock() {
        let (registry, cache, services, spa) = pool();
        let generation = spa.config_generation();
        {
            let _txn = registry.vdev_enter(&spa);
            spa.set_pending_vdev(Some(VdevId(3)));
            spa.vdev_config_dirty(VdevId(1));
        }

        assert!(spa.config_held(LockMask::ALL, RwDirection::Reader).is_empty());
        assert!(spa.config_try_enter(LockMask::ALL, RwDirection::Writer));
        spa.config_exit(LockMask::ALL);
        assert!(spa.vdev_top_lock().try_lock().is_some());
        assert_eq!(spa.pending_vdev(), None);
        assert_eq!(spa.config_generation(), generation);
        assert!(services.txg.waits().is_empty());
        assert_eq!(cache.writes(), 0);
        let events = services.vdevs.take_events();
        assert_eq!(events.last(), Some(&VdevEvent::Reassessed(VdevId::ROOT)));
        assert!(events.contains(&VdevEvent::AutotrimRestarted));

        // The next reconfiguration is not blocked.
        registry.vdev_enter(&spa).exit(None, Ok(())).unwrap();
        teardown(registry, &spa);
    }

    #[test]
    fn transaction_dropped_between_phases_restarts_autotrim() {
        let (registry, _, services, spa) = pool();
        {
            let mut txn = registry.vdev_enter(&spa);
            let txg = txn.txg();
            txn.config_exit(None, txg, false).unwrap();
        }
        assert!(spa.config_try_enter(LockMask::ALL, RwDirection::Writer));
        spa.config_exit(LockMask::ALL);
        assert_eq!(
            services.vdevs.take_events().last(),
            Some(&VdevEvent::AutotrimRestarted)
        );
        teardown(registry, &spa);
    }

    #[test]
    fn dropped_state_transaction_releases_tiers() {
        let (registry, cache, _, spa) = pool();
        {
            let _txn = registry.vdev_state_enter(&spa, LockMask::ALLOC);
            assert!(spa.config_locks().tier(Tier::Alloc).has_writer());
        }
        assert!(spa.config_held(LockMask::ALL, RwDirection::Reader).is_empty());
        assert!(spa.config_try_enter(LockMask::ALL, RwDirection::Writer));
        spa.config_exit(LockMask::ALL);
        assert_eq!(cache.writes(), 0);
        teardown(registry, &spa);
    }

    #[test]
    fn state_change_marks_top_level_dirty() {
        let (registry, cache, services, spa) = pool();
        let generation = spa.config_generation();
        let txn = registry.vdev_state_enter(&spa, LockMask::NONE);
        assert_eq!(txn.locks(), LockMask::STATE_ALL);
        assert!(spa.config_locks().tier(Tier::State).has_writer());
        assert!(!spa.config_locks().tier(Tier::Config).has_writer());
        txn.exit(Some(VdevId(2)), Ok(())).unwrap();

        let events = services.vdevs.take_events();
        assert!(events.contains(&VdevEvent::Reassessed(VdevId(1))));
        assert!(events.contains(&VdevEvent::StateDirty(VdevId(1))));
        assert_eq!(spa.config_generation(), generation + 1);
        assert_eq!(services.txg.waits().len(), 1);
        assert_eq!(cache.get("tank").unwrap().config_generation, generation + 1);
        teardown(registry, &spa);
    }

    #[test]
    fn state_transaction_without_vdev_changes_nothing() {
        let (registry, cache, services, spa) = pool();
        let txn = registry.vdev_state_enter(&spa, LockMask::ALLOC);
        assert_eq!(txn.locks(), LockMask::STATE_ALL | LockMask::ALLOC);
        txn.exit(None, Ok(())).unwrap();
        assert_eq!(
            services.vdevs.take_events(),
            vec![VdevEvent::Reassessed(VdevId::ROOT)]
        );
        assert!(services.txg.waits().is_empty());
        assert_eq!(cache.writes(), 0);
        assert!(spa.config_held(LockMask::ALL, RwDirection::Reader).is_empty());
        teardown(registry, &spa);
    }
}
