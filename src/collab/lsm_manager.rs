//! The LSM manager collaborator: §6 names `push_entry(WORK_SWITCH, 0, tree)`
//! as the write-admission path's way of signaling a background worker. The
//! worker itself is out of scope; `SimpleLsmManager` runs one on a
//! `crossbeam` channel so `lsm::cursor_lifecycle`'s reopen-on-stale-dsk_gen
//! path has a real asynchronous reshape to observe, rather than the switch
//! happening synchronously inline with the writer that requested it.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use log::debug;

use crate::collab::txn::TransactionManager;
use crate::lsm::chunk::LsmTree;

/// the one work item this crate's slice of the LSM manager understands;
/// real implementations enqueue merges, bloom builds, drops, etc. too.
pub enum WorkItem {
    Switch(Arc<LsmTree>),
}

pub trait LsmManager: Send + Sync {
    /// Enqueues a chunk switch. Idempotent from the caller's point of view:
    /// the tree's `NEED_SWITCH` flag is what actually gates duplicate work,
    /// this just wakes the worker up.
    fn push_switch(&self, tree: Arc<LsmTree>);
}

pub struct SimpleLsmManager {
    tx: Sender<WorkItem>,
    _worker: JoinHandle<()>,
}

impl SimpleLsmManager {
    pub fn new(txm: Arc<dyn TransactionManager>) -> Arc<Self> {
        let (tx, rx): (Sender<WorkItem>, Receiver<WorkItem>) = channel::unbounded();
        let worker = std::thread::spawn(move || Self::run(rx, txm));
        Arc::new(Self { tx, _worker: worker })
    }

    fn run(rx: Receiver<WorkItem>, txm: Arc<dyn TransactionManager>) {
        for item in rx {
            match item {
                WorkItem::Switch(tree) => {
                    let at_txn = txm.current();
                    debug!("lsm worker: performing switch at txn {}", at_txn);
                    tree.do_switch(at_txn);
                }
            }
        }
    }
}

impl LsmManager for SimpleLsmManager {
    fn push_switch(&self, tree: Arc<LsmTree>) {
        // a closed receiver means the worker thread is gone (test teardown
        // raced a background write); nothing left to signal.
        let _ = self.tx.send(WorkItem::Switch(tree));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::txn::SimpleTransactionManager;
    use std::time::Duration;

    #[test]
    fn push_switch_eventually_reshapes_the_tree() {
        let txm: Arc<dyn TransactionManager> = Arc::new(SimpleTransactionManager::new());
        let mgr = SimpleLsmManager::new(Arc::clone(&txm));
        let tree = Arc::new(LsmTree::new(1024));
        tree.append_new_primary();
        let gen0 = tree.dsk_gen();
        mgr.push_switch(Arc::clone(&tree));

        let mut waited = Duration::from_millis(0);
        while tree.dsk_gen() == gen0 && waited < Duration::from_secs(1) {
            std::thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert!(tree.dsk_gen() > gen0);
        assert_eq!(tree.nchunks(), 2);
    }
}
