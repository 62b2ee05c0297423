//! Transaction groups (epochs) as seen by the control plane.
//!
//! Committing a transaction group is the job of the sync pipeline and lives
//! outside of this crate. The control plane only needs to know which epoch
//! was committed last, to open write transactions and to wait until a given
//! epoch is durable.

use parking_lot::Mutex;
use std::cmp;

/// The first transaction group of a freshly created pool.
pub const TXG_INITIAL: u64 = 4;

/// A write transaction. Changes made through it become durable together with
/// the transaction group it is assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    txg: Option<u64>,
}

impl Tx {
    /// Creates a transaction that is already assigned to `txg`.
    pub fn assigned(txg: u64) -> Self {
        Tx { txg: Some(txg) }
    }

    /// The transaction group this transaction belongs to.
    ///
    /// # Panics
    /// Panics if the transaction has not been assigned yet.
    pub fn txg(&self) -> u64 {
        self.txg.expect("transaction is not assigned to a txg")
    }

    /// Returns whether the transaction has been assigned.
    pub fn is_assigned(&self) -> bool {
        self.txg.is_some()
    }
}

/// The epoch scheduler of a pool.
pub trait TxgSync: Send + Sync {
    /// The most recently committed transaction group.
    fn last_synced_txg(&self) -> u64;

    /// The transaction group currently accepting changes.
    fn open_txg(&self) -> u64;

    /// Blocks until `txg` is durable. `0` waits for the currently open group.
    fn wait_synced(&self, txg: u64);

    /// Starts a new, not yet assigned write transaction.
    fn begin_write(&self) -> Tx {
        Tx { txg: None }
    }

    /// Assigns `tx` to the open transaction group.
    fn assign(&self, tx: &mut Tx) {
        debug_assert!(!tx.is_assigned());
        tx.txg = Some(self.open_txg());
    }
}

#[derive(Debug)]
struct TxgState {
    open: u64,
    synced: u64,
    waits: Vec<u64>,
}

/// An in-memory scheduler which commits a transaction group as soon as
/// someone waits for it.
#[derive(Debug)]
pub struct SyncTxg {
    state: Mutex<TxgState>,
}

impl SyncTxg {
    /// Creates a scheduler for a freshly created pool.
    pub fn new() -> Self {
        SyncTxg::with_last_synced(TXG_INITIAL - 1)
    }

    /// Creates a scheduler whose last committed group is `synced`.
    pub fn with_last_synced(synced: u64) -> Self {
        SyncTxg {
            state: Mutex::new(TxgState {
                open: synced + 1,
                synced,
                waits: Vec::new(),
            }),
        }
    }

    /// Transaction groups that were waited for, in order.
    pub fn waits(&self) -> Vec<u64> {
        self.state.lock().waits.clone()
    }
}

impl Default for SyncTxg {
    fn default() -> Self {
        SyncTxg::new()
    }
}

impl TxgSync for SyncTxg {
    fn last_synced_txg(&self) -> u64 {
        self.state.lock().synced
    }

    fn open_txg(&self) -> u64 {
        self.state.lock().open
    }

    fn wait_synced(&self, txg: u64) {
        let mut state = self.state.lock();
        let target = if txg == 0 { state.open } else { txg };
        state.waits.push(target);
        while state.synced < target {
            state.synced += 1;
            state.open = cmp::max(state.open, state.synced + 1);
            debug!("txg {} synced", state.synced);
        }
    }
}
