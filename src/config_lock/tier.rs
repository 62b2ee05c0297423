use super::RwDirection;
use parking_lot::{Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct TierState {
    writer: Option<ThreadId>,
    write_wanted: u32,
    count: u64,
}

/// A single reader/writer tier with writer preference.
///
/// Unlike a guard based lock a tier may be released by a thread other than
/// the one that acquired it, so ownership can be handed off between threads.
#[derive(Debug, Default)]
pub struct ConfigLockTier {
    state: Mutex<TierState>,
    cv: Condvar,
}

impl ConfigLockTier {
    /// Creates an unheld tier.
    pub fn new() -> Self {
        ConfigLockTier::default()
    }

    pub(super) fn try_enter(&self, rw: RwDirection) -> bool {
        let mut state = self.state.lock();
        match rw {
            RwDirection::Reader => {
                if state.writer.is_some() || state.write_wanted > 0 {
                    return false;
                }
            }
            RwDirection::Writer => {
                assert_ne!(
                    state.writer,
                    Some(thread::current().id()),
                    "config lock tier is already held as writer by this thread"
                );
                if state.count != 0 {
                    return false;
                }
                state.writer = Some(thread::current().id());
            }
        }
        state.count += 1;
        true
    }

    pub(super) fn enter(&self, rw: RwDirection, priority: bool) {
        let mut state = self.state.lock();
        match rw {
            RwDirection::Reader => {
                while state.writer.is_some() || (!priority && state.write_wanted > 0) {
                    self.cv.wait(&mut state);
                }
            }
            RwDirection::Writer => {
                let me = thread::current().id();
                assert_ne!(
                    state.writer,
                    Some(me),
                    "config lock tier is already held as writer by this thread"
                );
                while state.count != 0 {
                    state.write_wanted += 1;
                    self.cv.wait(&mut state);
                    state.write_wanted -= 1;
                }
                state.writer = Some(me);
            }
        }
        state.count += 1;
    }

    pub(super) fn exit(&self) {
        let mut state = self.state.lock();
        assert!(state.count > 0, "config lock tier released while not held");
        state.count -= 1;
        if state.count == 0 {
            // The writer may have been handed off to this thread.
            state.writer = None;
            self.cv.notify_all();
        }
    }

    /// Returns whether the tier is held in the given direction. A writer
    /// claim only counts if it belongs to the calling thread.
    pub fn is_held(&self, rw: RwDirection) -> bool {
        let state = self.state.lock();
        match rw {
            RwDirection::Reader => state.count != 0,
            RwDirection::Writer => state.writer == Some(thread::current().id()),
        }
    }

    /// Returns whether the calling thread is the recorded writer.
    pub(super) fn is_writer(&self, me: ThreadId) -> bool {
        self.state.lock().writer == Some(me)
    }

    /// Number of current holders.
    pub fn holders(&self) -> u64 {
        self.state.lock().count
    }

    /// Number of writers currently blocked waiting for this tier.
    pub fn write_wanted(&self) -> u32 {
        self.state.lock().write_wanted
    }

    /// Returns whether some thread holds the tier exclusively.
    pub fn has_writer(&self) -> bool {
        self.state.lock().writer.is_some()
    }
}

impl Drop for ConfigLockTier {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        let state = self.state.get_mut();
        assert_eq!(state.count, 0, "config lock tier destroyed while held");
        assert!(state.writer.is_none());
        assert_eq!(state.write_wanted, 0);
    }
}
