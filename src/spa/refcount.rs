use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Holders {
    count: u64,
    tags: HashMap<String, u64>,
}

/// A reference count that optionally remembers who holds the references.
///
/// With tracking enabled every release must name a tag that was used to
/// acquire a reference, which catches mismatched open/close pairs early.
#[derive(Debug)]
pub struct RefCount {
    holders: Mutex<Holders>,
    tracked: bool,
}

impl RefCount {
    /// Creates a zero reference count.
    pub fn new(tracked: bool) -> Self {
        RefCount {
            holders: Mutex::new(Holders::default()),
            tracked,
        }
    }

    /// Current number of references.
    pub fn count(&self) -> u64 {
        self.holders.lock().count
    }

    /// Adds a reference and returns the new count.
    pub fn add(&self, tag: &str) -> u64 {
        let mut holders = self.holders.lock();
        holders.count += 1;
        if self.tracked {
            *holders.tags.entry(tag.to_string()).or_insert(0) += 1;
        }
        holders.count
    }

    /// Drops a reference and returns the new count.
    pub fn remove(&self, tag: &str) -> u64 {
        let mut holders = self.holders.lock();
        assert!(holders.count > 0, "reference count underflow");
        if self.tracked {
            let remaining = match holders.tags.get_mut(tag) {
                Some(n) => {
                    *n -= 1;
                    *n
                }
                None => panic!("no reference held with tag {:?}", tag),
            };
            if remaining == 0 {
                holders.tags.remove(tag);
            }
        }
        holders.count -= 1;
        holders.count
    }

    /// Current holders with their number of references. Empty unless
    /// tracking is enabled.
    pub fn holders(&self) -> Vec<(String, u64)> {
        let holders = self.holders.lock();
        let mut tags: Vec<_> = holders
            .tags
            .iter()
            .map(|(tag, &n)| (tag.clone(), n))
            .collect();
        tags.sort();
        tags
    }
}
