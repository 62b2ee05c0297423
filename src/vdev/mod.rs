//! The vdev tree as seen by the control plane.
//!
//! Vdevs themselves (their I/O, allocation maps and background maintenance)
//! are implemented elsewhere. Reconfiguration transactions only drive them
//! through the `VdevOps` trait.

mod memory;

pub use self::memory::{MemoryVdevs, VdevEvent};

/// Identifies a vdev within the tree of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VdevId(pub u64);

impl VdevId {
    /// The root of the vdev tree.
    pub const ROOT: VdevId = VdevId(0);

    /// Returns whether this is the root vdev.
    pub fn is_root(self) -> bool {
        self == VdevId::ROOT
    }
}

/// Operations a reconfiguration transaction performs on the vdev tree.
pub trait VdevOps: Send + Sync {
    /// The top-level vdev `vd` belongs to. The root maps to itself.
    fn top_level(&self, vd: VdevId) -> VdevId;

    /// Returns whether `vd` is a leaf device.
    fn is_leaf(&self, vd: VdevId) -> bool;

    /// Returns whether `vd` has been detached from its parent.
    fn is_detached(&self, vd: VdevId) -> bool;

    /// Returns whether `vd` still has on-disk dirty region tracking attached.
    fn has_dirty_region_map(&self, vd: VdevId) -> bool;

    /// Recomputes which regions of the subtree under `vd` are known to be
    /// missing data.
    fn reassess_dirty_regions(&self, vd: VdevId);

    /// Called when the label configuration of `vd` must be rewritten.
    fn config_dirty(&self, vd: VdevId);

    /// Called when the state of `vd` must be rewritten.
    fn state_dirty(&self, vd: VdevId);

    /// Stops initialization and trimming of the leaf `vd`.
    fn stop_maintenance(&self, vd: VdevId);

    /// Stops automatic trimming of the whole pool and waits for it.
    fn stop_autotrim(&self);

    /// Restarts automatic trimming after a reconfiguration.
    fn restart_autotrim(&self);

    /// Releases all in-memory state of `vd`, which has left the tree.
    fn free(&self, vd: VdevId);
}
