use super::{VdevId, VdevOps};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Something a reconfiguration did to the vdev tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdevEvent {
    /// `reassess_dirty_regions` ran on the given vdev.
    Reassessed(VdevId),
    /// Label configuration of the vdev became dirty.
    ConfigDirty(VdevId),
    /// State of the vdev became dirty.
    StateDirty(VdevId),
    /// Maintenance of the leaf was stopped.
    MaintenanceStopped(VdevId),
    /// Pool-wide automatic trimming was stopped.
    AutotrimStopped,
    /// Pool-wide automatic trimming was restarted.
    AutotrimRestarted,
    /// The vdev was freed.
    Freed(VdevId),
}

#[derive(Debug, Clone)]
struct Node {
    parent: VdevId,
    leaf: bool,
    detached: bool,
    dirty_region_map: bool,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<VdevId, Node>,
    events: Vec<VdevEvent>,
}

/// An in-memory vdev tree which records every operation performed on it.
#[derive(Debug, Default)]
pub struct MemoryVdevs {
    inner: Mutex<Inner>,
}

impl MemoryVdevs {
    /// Creates a tree that only consists of the root.
    pub fn new() -> Self {
        MemoryVdevs::default()
    }

    /// Adds a vdev below `parent`.
    pub fn add(&self, vd: VdevId, parent: VdevId, leaf: bool) {
        assert!(!vd.is_root());
        self.inner.lock().nodes.insert(
            vd,
            Node {
                parent,
                leaf,
                detached: false,
                dirty_region_map: false,
            },
        );
    }

    /// Marks `vd` as detached from its parent.
    pub fn detach(&self, vd: VdevId) {
        if let Some(node) = self.inner.lock().nodes.get_mut(&vd) {
            node.detached = true;
        }
    }

    /// Attaches or drops on-disk dirty region tracking of `vd`.
    pub fn set_dirty_region_map(&self, vd: VdevId, present: bool) {
        if let Some(node) = self.inner.lock().nodes.get_mut(&vd) {
            node.dirty_region_map = present;
        }
    }

    /// Returns whether `vd` is still part of the tree.
    pub fn contains(&self, vd: VdevId) -> bool {
        vd.is_root() || self.inner.lock().nodes.contains_key(&vd)
    }

    /// Drains the recorded events.
    pub fn take_events(&self) -> Vec<VdevEvent> {
        ::std::mem::replace(&mut self.inner.lock().events, Vec::new())
    }

    fn record(&self, event: VdevEvent) {
        self.inner.lock().events.push(event);
    }

    fn node_flag<F: Fn(&Node) -> bool>(&self, vd: VdevId, f: F) -> bool {
        self.inner.lock().nodes.get(&vd).map_or(false, f)
    }
}

impl VdevOps for MemoryVdevs {
    fn top_level(&self, vd: VdevId) -> VdevId {
        let inner = self.inner.lock();
        let mut current = vd;
        while let Some(node) = inner.nodes.get(&current) {
            if node.parent.is_root() {
                return current;
            }
            current = node.parent;
        }
        VdevId::ROOT
    }

    fn is_leaf(&self, vd: VdevId) -> bool {
        self.node_flag(vd, |node| node.leaf)
    }

    fn is_detached(&self, vd: VdevId) -> bool {
        self.node_flag(vd, |node| node.detached)
    }

    fn has_dirty_region_map(&self, vd: VdevId) -> bool {
        self.node_flag(vd, |node| node.dirty_region_map)
    }

    fn reassess_dirty_regions(&self, vd: VdevId) {
        self.record(VdevEvent::Reassessed(vd));
    }

    fn config_dirty(&self, vd: VdevId) {
        self.record(VdevEvent::ConfigDirty(vd));
    }

    fn state_dirty(&self, vd: VdevId) {
        self.record(VdevEvent::StateDirty(vd));
    }

    fn stop_maintenance(&self, vd: VdevId) {
        self.record(VdevEvent::MaintenanceStopped(vd));
    }

    fn stop_autotrim(&self) {
        self.record(VdevEvent::AutotrimStopped);
    }

    fn restart_autotrim(&self) {
        self.record(VdevEvent::AutotrimRestarted);
    }

    fn free(&self, vd: VdevId) {
        let mut inner = self.inner.lock();
        inner.nodes.remove(&vd);
        inner.events.push(VdevEvent::Freed(vd));
    }
}
