use super::{ErrorKind, FeatureDescriptor, FeatureFlags, FeatureId, FeatureRegistry, Result};
use crate::config_lock::{LockMask, RwDirection};
use crate::spa::Spa;
use crate::store::{MapId, Value};
use crate::txg::Tx;
use std::collections::BTreeMap;

/// First pool version that tracks features instead of a version number.
pub const SPA_VERSION_FEATURES: u64 = 5000;

/// Last pool version before feature flags.
pub const SPA_VERSION_BEFORE_FEATURES: u64 = 28;

/// The three maps backing a pool's feature state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureObjects {
    /// Reference counts of features a reader must understand.
    pub for_read: MapId,
    /// Reference counts of read-only compatible features.
    pub for_write: MapId,
    /// Descriptions of enabled features.
    pub descriptions: MapId,
}

impl FeatureObjects {
    fn refcount_map(&self, feature: &FeatureDescriptor) -> MapId {
        if feature.is_readonly_compat() {
            self.for_write
        } else {
            self.for_read
        }
    }
}

/// State of a feature on a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    /// The pool has never heard of the feature.
    Disabled,
    /// The feature may be used but the on-disk format does not depend on it.
    Enabled,
    /// The on-disk format depends on the feature.
    Active,
}

/// Which refcount map an entry was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureMap {
    /// Features a reader must understand.
    ForRead,
    /// Features a writer must understand.
    ForWrite,
}

/// An active feature this build does not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFeature {
    /// Guid of the feature.
    pub guid: String,
    /// Description stored on disk, empty if there is none.
    pub description: String,
    /// Map the feature was found in. Only `ForWrite` entries still allow a
    /// read-only import.
    pub map: FeatureMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Enable,
    Increment,
    Decrement,
}

/// Enables, activates and deactivates features of one pool.
///
/// Mutating operations must run in epoch-synchronous context: `tx` must be
/// assigned and the caller must hold at least the config tier of the pool's
/// configuration lock.
pub struct FeatureActivation<'a> {
    spa: &'a Spa,
    registry: &'a FeatureRegistry,
}

impl<'a> FeatureActivation<'a> {
    /// Operates on `spa` using the features described by `registry`.
    pub fn new(spa: &'a Spa, registry: &'a FeatureRegistry) -> Self {
        FeatureActivation { spa, registry }
    }

    /// Operates on `spa` using the built-in features.
    pub fn builtin(spa: &'a Spa) -> Self {
        FeatureActivation::new(spa, FeatureRegistry::builtin())
    }

    /// The registry in use.
    pub fn registry(&self) -> &'a FeatureRegistry {
        self.registry
    }

    /// Creates the three feature maps of a pool that is upgraded to, or
    /// created with, feature flags.
    pub fn create_feature_objects(&self, tx: &Tx) -> Result<FeatureObjects> {
        self.check_sync_context(tx);
        let store = &self.spa.services().store;
        let objects = FeatureObjects {
            for_read: store.create_map(tx)?,
            for_write: store.create_map(tx)?,
            descriptions: store.create_map(tx)?,
        };
        self.spa.set_feature_objects(Some(objects));
        info!(
            "pool {} feature maps created in txg {}",
            self.spa.name(),
            tx.txg()
        );
        Ok(objects)
    }

    /// Enables `feature` together with everything it depends on.
    ///
    /// Enabling an already enabled feature does nothing. Dependencies are
    /// enabled before their dependents, and features flagged
    /// `ACTIVATE_ON_ENABLE` are activated right away.
    pub fn enable<F: Into<FeatureId>>(&self, feature: F, tx: &Tx) -> Result<()> {
        self.check_sync_context(tx);
        let id = feature.into();
        let objects = match self.spa.feature_objects() {
            Some(objects) => objects,
            None => return Err(ErrorKind::NoFeatureObjects.into()),
        };
        if self.stored_refcount(&objects, self.registry.get(id))?.is_some() {
            return Ok(());
        }
        let closure = self.registry.closure(id);
        if let Some(&missing) = closure.iter().find(|&&dep| !self.registry.get(dep).supported) {
            bail!(ErrorKind::NotSupported(self.registry.get(missing).guid.clone()));
        }
        for dep in closure {
            let descriptor = self.registry.get(dep);
            if self.stored_refcount(&objects, descriptor)?.is_some() {
                continue;
            }
            self.do_action(&objects, descriptor, Action::Enable, tx)?;
            if descriptor.flags.contains(FeatureFlags::ACTIVATE_ON_ENABLE) {
                self.do_action(&objects, descriptor, Action::Increment, tx)?;
            }
        }
        Ok(())
    }

    /// Increments the reference count of an enabled feature.
    pub fn increment<F: Into<FeatureId>>(&self, feature: F, tx: &Tx) -> Result<()> {
        self.check_sync_context(tx);
        let descriptor = self.registry.get(feature.into());
        let objects = self.objects_for(descriptor)?;
        self.do_action(&objects, descriptor, Action::Increment, tx)
    }

    /// Decrements the reference count of an active feature.
    pub fn decrement<F: Into<FeatureId>>(&self, feature: F, tx: &Tx) -> Result<()> {
        self.check_sync_context(tx);
        let descriptor = self.registry.get(feature.into());
        let objects = self.objects_for(descriptor)?;
        self.do_action(&objects, descriptor, Action::Decrement, tx)
    }

    /// Current reference count, `NotSupported` if the feature is not enabled.
    pub fn refcount<F: Into<FeatureId>>(&self, feature: F) -> Result<u64> {
        let descriptor = self.registry.get(feature.into());
        let objects = self.objects_for(descriptor)?;
        match self.stored_refcount(&objects, descriptor)? {
            Some(refcount) => Ok(refcount),
            None => Err(ErrorKind::NotSupported(descriptor.guid.clone()).into()),
        }
    }

    /// Returns whether `feature` is enabled (or active).
    pub fn is_enabled<F: Into<FeatureId>>(&self, feature: F) -> bool {
        self.state(feature) != FeatureState::Disabled
    }

    /// Returns whether `feature` is active.
    pub fn is_active<F: Into<FeatureId>>(&self, feature: F) -> bool {
        self.state(feature) == FeatureState::Active
    }

    /// State of `feature`. Pools that predate feature flags report every
    /// feature as disabled.
    pub fn state<F: Into<FeatureId>>(&self, feature: F) -> FeatureState {
        if self.spa.version() < SPA_VERSION_FEATURES {
            return FeatureState::Disabled;
        }
        let descriptor = self.registry.get(feature.into());
        match self.refcount(descriptor.id) {
            Ok(0) => FeatureState::Enabled,
            Ok(_) => FeatureState::Active,
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotSupported(_) => {}
                    _ => warn!(
                        "pool {} failed to read state of {}: {}",
                        self.spa.name(),
                        descriptor.guid,
                        e
                    ),
                }
                FeatureState::Disabled
            }
        }
    }

    /// Reference counts of every feature stored on the pool, including
    /// features unknown to this build.
    pub fn enabled_features(&self) -> Result<BTreeMap<String, u64>> {
        let objects = match self.spa.feature_objects() {
            Some(objects) => objects,
            None => return Ok(BTreeMap::new()),
        };
        let store = &self.spa.services().store;
        let mut features = BTreeMap::new();
        for &map in [objects.for_read, objects.for_write].iter() {
            for (guid, value) in store.entries(map)? {
                let refcount = value.into_count(&guid)?;
                features.insert(guid, refcount);
            }
        }
        Ok(features)
    }

    /// Lists active features this build does not understand.
    ///
    /// An empty list means the pool can be opened read-write. If only
    /// `FeatureMap::ForWrite` entries are reported it can still be opened
    /// read-only.
    pub fn check_supported(&self) -> Result<Vec<UnsupportedFeature>> {
        let objects = match self.spa.feature_objects() {
            Some(objects) => objects,
            None => return Ok(Vec::new()),
        };
        let store = &self.spa.services().store;
        let mut unsupported = Vec::new();
        for &(map, kind) in [
            (objects.for_read, FeatureMap::ForRead),
            (objects.for_write, FeatureMap::ForWrite),
        ]
        .iter()
        {
            for (guid, value) in store.entries(map)? {
                if value.into_count(&guid)? == 0 || self.registry.is_supported_by_this_build(&guid)
                {
                    continue;
                }
                let description = match store.lookup(objects.descriptions, &guid)? {
                    Some(Value::Text(text)) => text,
                    _ => String::new(),
                };
                unsupported.push(UnsupportedFeature {
                    guid,
                    description,
                    map: kind,
                });
            }
        }
        Ok(unsupported)
    }

    fn check_sync_context(&self, tx: &Tx) {
        debug_assert!(tx.is_assigned(), "feature change outside of an assigned transaction");
        debug_assert!(
            !self
                .spa
                .config_held(LockMask::CONFIG, RwDirection::Reader)
                .is_empty(),
            "feature change without holding the config tier"
        );
    }

    fn objects_for(&self, feature: &FeatureDescriptor) -> Result<FeatureObjects> {
        match self.spa.feature_objects() {
            Some(objects) if self.spa.version() >= SPA_VERSION_FEATURES => Ok(objects),
            _ => Err(ErrorKind::NotSupported(feature.guid.clone()).into()),
        }
    }

    fn stored_refcount(
        &self,
        objects: &FeatureObjects,
        feature: &FeatureDescriptor,
    ) -> Result<Option<u64>> {
        let map = objects.refcount_map(feature);
        match self.spa.services().store.lookup(map, &feature.guid)? {
            Some(value) => Ok(Some(value.into_count(&feature.guid)?)),
            None => Ok(None),
        }
    }

    fn do_action(
        &self,
        objects: &FeatureObjects,
        feature: &FeatureDescriptor,
        action: Action,
        tx: &Tx,
    ) -> Result<()> {
        let guid = &feature.guid;
        let current = self.stored_refcount(objects, feature)?;
        let refcount = match (action, current) {
            (Action::Enable, Some(_)) => return Ok(()),
            (Action::Enable, None) => 0,
            (_, None) => return Err(ErrorKind::NotSupported(guid.clone()).into()),
            (Action::Increment, Some(std::u64::MAX)) | (Action::Decrement, Some(0)) => {
                bail!(ErrorKind::Overflow(guid.clone()))
            }
            (Action::Increment, Some(n)) => n + 1,
            (Action::Decrement, Some(n)) => n - 1,
        };

        let store = &self.spa.services().store;
        store.update(objects.refcount_map(feature), guid, Value::Count(refcount), tx)?;

        match action {
            Action::Enable => {
                store.update(
                    objects.descriptions,
                    guid,
                    Value::Text(feature.description.clone()),
                    tx,
                )?;
                info!(
                    "pool {} enabled feature {} in txg {}",
                    self.spa.name(),
                    guid,
                    tx.txg()
                );
            }
            Action::Increment if refcount == 1 => {
                if feature.flags.contains(FeatureFlags::MOS) {
                    self.spa.activate_mos_feature(guid, tx);
                }
                debug!("pool {} activated feature {}", self.spa.name(), guid);
            }
            Action::Decrement if refcount == 0 => {
                if feature.flags.contains(FeatureFlags::MOS) {
                    self.spa.deactivate_mos_feature(guid);
                }
                debug!("pool {} deactivated feature {}", self.spa.name(), guid);
            }
            _ => trace!("pool {} feature {} refcount {}", self.spa.name(), guid, refcount),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureActivation, FeatureMap, FeatureState, SPA_VERSION_BEFORE_FEATURES};
    use crate::config_lock::{LockMask, RwDirection};
    use crate::feature::{
        ErrorKind, FeatureDescriptor, FeatureFlags, FeatureId, FeatureRegistry, SpaFeature,
    };
    use crate::store::{FailureMode, ObjectStore, Value};
    use crate::test::TestPool;
    use crate::txg::{Tx, TXG_INITIAL};
    use crate::vdev::{VdevEvent, VdevId};
    use quickcheck::TestResult;

    fn with_config<F: FnOnce(&TestPool, &FeatureActivation)>(f: F) {
        let pool = TestPool::new("tank");
        pool.spa.config_enter(LockMask::CONFIG, RwDirection::Reader);
        {
            let features = FeatureActivation::builtin(&pool.spa);
            features.create_feature_objects(&Tx::assigned(TXG_INITIAL)).unwrap();
            f(&pool, &features);
        }
        pool.spa.config_exit(LockMask::CONFIG);
    }

    #[test]
    fn enable_is_idempotent() {
        with_config(|pool, features| {
            let tx = Tx::assigned(10);
            features.enable(SpaFeature::AsyncDestroy, &tx).unwrap();
            let writes = pool.store.writes();
            features.enable(SpaFeature::AsyncDestroy, &tx).unwrap();
            assert_eq!(pool.store.writes(), writes);
            assert_eq!(features.refcount(SpaFeature::AsyncDestroy).unwrap(), 0);
            assert_eq!(features.state(SpaFeature::AsyncDestroy), FeatureState::Enabled);
        });
    }

    #[test]
    fn enable_pulls_in_dependencies() {
        with_config(|pool, features| {
            let tx = Tx::assigned(10);
            features.enable(SpaFeature::Encryption, &tx).unwrap();
            for &f in [
                SpaFeature::ExtensibleDataset,
                SpaFeature::Bookmarks,
                SpaFeature::BookmarkV2,
                SpaFeature::Encryption,
            ]
            .iter()
            {
                assert_eq!(features.state(f), FeatureState::Enabled, "{:?}", f);
            }
            assert!(!features.is_enabled(SpaFeature::RedactionBookmarks));

            let objects = pool.spa.feature_objects().unwrap();
            assert_eq!(
                pool.store.lookup(objects.descriptions, "com.datto:encryption").unwrap(),
                Some(Value::Text("Support for dataset level encryption".to_string()))
            );
            // Read-only compatible features are counted in the write map.
            assert!(pool
                .store
                .contains(objects.for_write, "com.delphix:bookmarks")
                .unwrap());
            assert!(pool
                .store
                .contains(objects.for_read, "com.datto:encryption")
                .unwrap());
        });
    }

    #[test]
    fn unsupported_dependency_blocks_enable() {
        let registry = FeatureRegistry::new(vec![
            FeatureDescriptor::new(
                FeatureId(0),
                "com.example:base",
                "base",
                "Not built in.",
                FeatureFlags::NONE,
                vec![],
            )
            .with_supported(false),
            FeatureDescriptor::new(
                FeatureId(1),
                "com.example:top",
                "top",
                "Needs base.",
                FeatureFlags::NONE,
                vec![FeatureId(0)],
            ),
        ])
        .unwrap();
        let pool = TestPool::new("tank");
        pool.spa.config_enter(LockMask::CONFIG, RwDirection::Reader);
        let features = FeatureActivation::new(&pool.spa, &registry);
        let tx = Tx::assigned(10);
        features.create_feature_objects(&tx).unwrap();
        match features.enable(FeatureId(1), &tx) {
            Err(e) => match e.kind() {
                ErrorKind::NotSupported(guid) => assert_eq!(guid, "com.example:base"),
                other => panic!("unexpected error {:?}", other),
            },
            Ok(()) => panic!("feature with unsupported dependency enabled"),
        }
        assert_eq!(pool.store.writes(), 3);
        assert_eq!(features.state(FeatureId(1)), FeatureState::Disabled);
        pool.spa.config_exit(LockMask::CONFIG);
    }

    #[test]
    fn increment_requires_enabled_feature() {
        with_config(|pool, features| {
            let tx = Tx::assigned(10);
            match features.increment(SpaFeature::Draid, &tx) {
                Err(e) => match e.kind() {
                    ErrorKind::NotSupported(guid) => assert_eq!(guid, "org.openzfs:draid"),
                    other => panic!("unexpected error {:?}", other),
                },
                Ok(()) => panic!("increment of disabled feature succeeded"),
            }
            assert_eq!(pool.store.writes(), 3);
            assert_eq!(features.state(SpaFeature::Draid), FeatureState::Disabled);
            assert!(features.decrement(SpaFeature::Draid, &tx).is_err());
        });
    }

    #[quickcheck]
    fn balanced_increments_return_to_enabled(n: u8) -> TestResult {
        if n == 0 {
            return TestResult::discard();
        }
        let mut ok = true;
        with_config(|_, features| {
            let tx = Tx::assigned(10);
            features.enable(SpaFeature::EmptyBpobj, &tx).unwrap();
            for _ in 0..n {
                features.increment(SpaFeature::EmptyBpobj, &tx).unwrap();
            }
            ok &= features.refcount(SpaFeature::EmptyBpobj).unwrap() == u64::from(n);
            ok &= features.is_active(SpaFeature::EmptyBpobj);
            for _ in 0..n {
                features.decrement(SpaFeature::EmptyBpobj, &tx).unwrap();
            }
            ok &= features.refcount(SpaFeature::EmptyBpobj).unwrap() == 0;
            ok &= match features.decrement(SpaFeature::EmptyBpobj, &tx) {
                Err(e) => match e.kind() {
                    ErrorKind::Overflow(_) => true,
                    _ => false,
                },
                Ok(()) => false,
            };
            ok &= features.refcount(SpaFeature::EmptyBpobj).unwrap() == 0;
        });
        TestResult::from_bool(ok)
    }

    #[test]
    fn increment_saturates_at_max() {
        with_config(|pool, features| {
            let tx = Tx::assigned(10);
            features.enable(SpaFeature::Livelist, &tx).unwrap();
            let objects = pool.spa.feature_objects().unwrap();
            pool.store
                .update(
                    objects.for_write,
                    "com.delphix:livelist",
                    Value::Count(std::u64::MAX),
                    &tx,
                )
                .unwrap();
            match features.increment(SpaFeature::Livelist, &tx) {
                Err(e) => match e.kind() {
                    ErrorKind::Overflow(_) => {}
                    other => panic!("unexpected error {:?}", other),
                },
                Ok(()) => panic!("increment past the maximum succeeded"),
            }
        });
    }

    #[test]
    fn activate_on_enable_updates_label() {
        with_config(|pool, features| {
            let tx = Tx::assigned(20);
            pool.vdevs.take_events();
            features.enable(SpaFeature::HoleBirth, &tx).unwrap();
            assert_eq!(features.state(SpaFeature::EnabledTxg), FeatureState::Enabled);
            assert_eq!(features.state(SpaFeature::HoleBirth), FeatureState::Active);
            assert_eq!(
                pool.spa.label_features(),
                vec!["com.delphix:hole_birth".to_string()]
            );
            assert!(pool
                .vdevs
                .take_events()
                .contains(&VdevEvent::ConfigDirty(VdevId::ROOT)));

            features.decrement(SpaFeature::HoleBirth, &tx).unwrap();
            assert!(pool.spa.label_features().is_empty());
            assert_eq!(pool.spa.config_dirty_vdevs(), vec![VdevId::ROOT]);
        });
    }

    #[test]
    fn initial_txg_does_not_dirty_label() {
        with_config(|pool, features| {
            let tx = Tx::assigned(TXG_INITIAL);
            features.enable(SpaFeature::EmbeddedData, &tx).unwrap();
            assert_eq!(
                pool.spa.label_features(),
                vec!["com.delphix:embedded_data".to_string()]
            );
            assert!(pool.spa.config_dirty_vdevs().is_empty());
        });
    }

    #[test]
    fn old_pools_have_no_features() {
        with_config(|pool, features| {
            features
                .enable(SpaFeature::AsyncDestroy, &Tx::assigned(10))
                .unwrap();
            pool.spa.set_version(SPA_VERSION_BEFORE_FEATURES);
            assert!(!features.is_enabled(SpaFeature::AsyncDestroy));
            assert!(features
                .increment(SpaFeature::AsyncDestroy, &Tx::assigned(10))
                .is_err());
        });
    }

    #[test]
    fn store_errors_propagate() {
        with_config(|pool, features| {
            let tx = Tx::assigned(10);
            features.enable(SpaFeature::AsyncDestroy, &tx).unwrap();
            pool.store.fail_reads(FailureMode::FailOperation);
            match features.increment(SpaFeature::AsyncDestroy, &tx) {
                Err(e) => match e.kind() {
                    ErrorKind::StoreError(_) => {}
                    other => panic!("unexpected error {:?}", other),
                },
                Ok(()) => panic!("increment succeeded despite failing store"),
            }
            pool.store.fail_reads(FailureMode::NoFail);
            assert_eq!(features.refcount(SpaFeature::AsyncDestroy).unwrap(), 0);
        });
    }

    #[test]
    fn unknown_active_features_are_reported() {
        with_config(|pool, features| {
            let tx = Tx::assigned(10);
            let objects = pool.spa.feature_objects().unwrap();
            let store = &pool.store;
            store
                .update(objects.for_read, "com.example:future", Value::Count(2), &tx)
                .unwrap();
            store
                .update(
                    objects.descriptions,
                    "com.example:future",
                    Value::Text("From the future.".to_string()),
                    &tx,
                )
                .unwrap();
            store
                .update(objects.for_write, "com.example:dormant", Value::Count(0), &tx)
                .unwrap();
            features.enable(SpaFeature::Lz4Compress, &tx).unwrap();

            let unsupported = features.check_supported().unwrap();
            assert_eq!(unsupported.len(), 1);
            assert_eq!(unsupported[0].guid, "com.example:future");
            assert_eq!(unsupported[0].description, "From the future.");
            assert_eq!(unsupported[0].map, FeatureMap::ForRead);

            let enabled = features.enabled_features().unwrap();
            assert_eq!(enabled.get("org.illumos:lz4_compress"), Some(&1));
            assert_eq!(enabled.get("com.example:dormant"), Some(&0));
        });
    }
}
