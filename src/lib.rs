//! Control plane of a transactional copy-on-write storage pool.
//!
//! The crate coordinates who may read or reconfigure a pool and when:
//! tiered configuration locks, the process-wide pool namespace, vdev
//! reconfiguration transactions and the registry of on-disk feature flags
//! together with the protocol that enables and activates them.
#![warn(missing_docs)]

extern crate bincode;
#[cfg(test)]
extern crate env_logger;
#[macro_use]
extern crate error_chain;
extern crate itertools;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate parking_lot;
#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use]
extern crate quickcheck_macros;
#[cfg(test)]
extern crate scoped_threadpool;
extern crate seqlock;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate toml;
extern crate twox_hash;

pub mod checksum;
pub mod config_cache;
pub mod config_lock;
pub mod configuration;
pub mod feature;
pub mod registry;
pub mod spa;
pub mod store;
pub mod txg;
pub mod vdev;


pub use self::config_lock::{ConfigLockSet, LockMask, RwDirection, Tier};
pub use self::configuration::Configuration;
pub use self::feature::{FeatureActivation, FeatureId, FeatureRegistry, SpaFeature};
pub use self::registry::{
    NamespaceGuard, PoolRegistry, VdevStateTransaction, VdevTransaction,
};
pub use self::spa::{PoolServices, PoolState, Spa};
