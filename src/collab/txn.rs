//! The transaction-manager collaborator: §6 names visibility checks,
//! conflict detection and the autocommit check C2's page-in loop consults
//! before handing back a hazard-protected page. Transaction *logging* is out
//! of scope (durability/WAL is a non-goal); this is purely the ordering and
//! visibility contract LMC and PMRC both call into.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

pub type TxnId = u64;

pub trait TransactionManager: Send + Sync {
    /// allocates a new, strictly increasing transaction id.
    fn begin(&self) -> TxnId;

    /// the highest id handed out so far, without allocating a new one; used
    /// to stamp a chunk's `switch_txn` at seal time.
    fn current(&self) -> TxnId;

    /// is a write stamped `txn` visible to a reader whose snapshot boundary
    /// is `as_of`?
    fn is_visible(&self, txn: TxnId, as_of: TxnId) -> bool;

    /// is `txn` visible to *every* currently live transaction? C4 walks a
    /// chunk's `switch_txn` backward until it finds one where this holds,
    /// to decide how many chunks a writer must touch for conflict checking.
    fn is_visible_all(&self, txn: TxnId) -> bool;

    /// C2's post-hazard-install check: if it fails, the caller must clear
    /// its hazard and surface the error instead of returning the page.
    fn autocommit_check(&self) -> Result<()>;

    /// C6's write-path conflict check: `current` is the writer's txn id,
    /// `key_last_writer` the id that last wrote this key (if any).
    fn check_conflict(&self, current: TxnId, key_last_writer: Option<TxnId>) -> Result<()>;
}

/// A read-committed-style reference implementation: every committed write is
/// immediately visible, conflicts are flagged only when a strictly newer
/// writer has already touched the key, and autocommit always succeeds
/// (there's no session/transaction-context plumbing in this crate to make it
/// fail against).
pub struct SimpleTransactionManager {
    next_txn: AtomicU64,
    autocommit_enabled: AtomicBool,
    active: Mutex<BTreeSet<TxnId>>,
}

impl SimpleTransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn: AtomicU64::new(1),
            autocommit_enabled: AtomicBool::new(true),
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// test hook: make the next `autocommit_check()` fail, the way a session
    /// with no active transaction context would.
    pub fn set_autocommit_enabled(&self, enabled: bool) {
        self.autocommit_enabled.store(enabled, Ordering::Relaxed);
    }

    /// marks `txn` complete, so `is_visible_all` no longer waits on it.
    /// Out-of-band completion isn't named by §6 directly, but a reference
    /// visibility tracker needs it to mean anything.
    pub fn end(&self, txn: TxnId) {
        self.active.lock().unwrap().remove(&txn);
    }
}

impl Default for SimpleTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager for SimpleTransactionManager {
    fn begin(&self) -> TxnId {
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        self.active.lock().unwrap().insert(id);
        id
    }

    fn current(&self) -> TxnId {
        self.next_txn.load(Ordering::Relaxed).saturating_sub(1)
    }

    fn is_visible(&self, txn: TxnId, as_of: TxnId) -> bool {
        txn <= as_of
    }

    fn is_visible_all(&self, txn: TxnId) -> bool {
        match self.active.lock().unwrap().iter().next() {
            Some(&oldest_live) => txn <= oldest_live,
            None => true,
        }
    }

    fn autocommit_check(&self) -> Result<()> {
        if self.autocommit_enabled.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::fatal("no active transaction context"))
        }
    }

    fn check_conflict(&self, current: TxnId, key_last_writer: Option<TxnId>) -> Result<()> {
        match key_last_writer {
            Some(w) if w >= current => Err(Error::conflict(format!(
                "txn {} conflicts with concurrent writer {}",
                current, w
            ))),
            _ => Ok(()),
        }
    }
}
