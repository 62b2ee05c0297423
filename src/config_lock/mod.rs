//! Tiered reader/writer configuration lock of a pool.
//!
//! A pool owns one `ConfigLockSet` made of six independent tiers. Callers
//! acquire an arbitrary subset, expressed as a `LockMask`, in a single call.
//! Tiers are taken in ascending order and released in descending order, so
//! two callers can never wait on each other in a cycle.
//!
//! Writers are preferred: once a writer waits for a tier, new readers queue
//! behind it. The only exception are priority readers, which are reserved for
//! the liveness heartbeat and only wait for an actual writer.
//!
//! Claims are not tied to guards. A claim taken by one thread may be released
//! by another, which is how work is handed off to I/O completion.

use std::thread;

mod mask;
mod tier;

pub use self::mask::{LockMask, RwDirection, Tier};
pub use self::tier::ConfigLockTier;

/// The six-tier configuration lock of a pool.
#[derive(Debug, Default)]
pub struct ConfigLockSet {
    tiers: [ConfigLockTier; Tier::COUNT],
}

impl ConfigLockSet {
    /// Creates a lock set with every tier unheld.
    pub fn new() -> Self {
        ConfigLockSet::default()
    }

    /// Returns a single tier, mainly for introspection.
    pub fn tier(&self, tier: Tier) -> &ConfigLockTier {
        &self.tiers[tier.index()]
    }

    /// Attempts to acquire all tiers of `mask` without blocking.
    ///
    /// Either every requested tier is acquired or, if one of them is
    /// unavailable, the tiers already taken by this call are released again
    /// and `false` is returned.
    pub fn try_enter(&self, mask: LockMask, rw: RwDirection) -> bool {
        for tier in mask.tiers() {
            if !self.tier(tier).try_enter(rw) {
                self.exit(mask.before(tier));
                trace!("config lock try_enter {:?} {:?} failed at {:?}", mask, rw, tier);
                return false;
            }
        }
        true
    }

    /// Acquires all tiers of `mask`, blocking as needed.
    pub fn enter(&self, mask: LockMask, rw: RwDirection) {
        self.enter_impl(mask, rw, false)
    }

    /// Like `enter`, but a reader only waits for an actual writer and ignores
    /// writers that are merely waiting.
    ///
    /// Reserved for the liveness heartbeat which must not be starved by a
    /// writer that is itself stuck behind slow I/O.
    pub fn enter_priority(&self, mask: LockMask, rw: RwDirection) {
        self.enter_impl(mask, rw, true)
    }

    fn enter_impl(&self, mask: LockMask, rw: RwDirection, priority: bool) {
        if cfg!(debug_assertions) {
            let me = thread::current().id();
            let write_held = Tier::ALL
                .iter()
                .filter(|&&tier| self.tier(tier).is_writer(me))
                .fold(LockMask::NONE, |acc, &tier| acc | tier.mask());
            // Any tier held as writer must sort at or below the request.
            debug_assert!(
                write_held.bits() <= mask.bits(),
                "config lock {:?} requested while holding {:?} as writer",
                mask,
                write_held
            );
        }
        for tier in mask.tiers() {
            self.tier(tier).enter(rw, priority);
        }
        trace!("config lock entered {:?} as {:?}", mask, rw);
    }

    /// Releases all tiers of `mask` in descending order.
    pub fn exit(&self, mask: LockMask) {
        for tier in mask.tiers().rev() {
            self.tier(tier).exit();
        }
        trace!("config lock exited {:?}", mask);
    }

    /// Returns the subset of `mask` that is held in direction `rw`.
    ///
    /// For readers any holder counts, for writers only a claim of the calling
    /// thread does.
    pub fn held(&self, mask: LockMask, rw: RwDirection) -> LockMask {
        mask.tiers()
            .filter(|&tier| self.tier(tier).is_held(rw))
            .fold(LockMask::NONE, |acc, tier| acc | tier.mask())
    }
}
