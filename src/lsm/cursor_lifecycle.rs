//! C4: chunk-cursor lifecycle. `ChunkCursorSet` is the per-LMC-cursor array
//! of child cursors, kept in sync with the tree's current chunk array every
//! time `open()` is called.
//!
//! Simplification from §4.4: the "walk existing child cursors, keep the
//! surviving prefix" reuse optimization is not implemented — every `open()`
//! closes and reopens every chunk's cursor. That optimization exists in the
//! source to amortize a real B-tree cursor's open cost; this crate's
//! reference child cursor (`MemChunkCursor`) is cheap enough that reopening
//! it on every reshape is not a correctness concern, only a constant-factor
//! one. The `MERGE` slice-open mode (§4.4 first paragraph), used only by the
//! out-of-scope background LSM merge worker, is likewise not implemented.
//! Nor is the read-lock-release-during-close / restart-on-dsk_gen-change
//! protocol §4.4 describes for a concurrent reshape racing an `open()`: the
//! in-memory reference never blocks on a lock while closing a cursor, so
//! there is nothing for that protocol to protect against here.

use std::sync::Arc;

use log::debug;

use crate::collab::bloom::BloomFilter;
use crate::collab::checkpointer::Checkpointer;
use crate::collab::child_cursor::{ChildCursor, ConflictCheckingCursor};
use crate::collab::txn::{TransactionManager, TxnId};
use crate::error::Result;
use crate::lsm::chunk::LsmTree;
use crate::utils::HandyRwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    UpdateNoSnapshot,
    UpdateSnapshot,
}

impl OpenMode {
    pub fn is_update(self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

#[derive(Default)]
pub struct ChunkCursorSet {
    pub dsk_gen: u64,
    pub cursors: Vec<Option<Box<dyn ChildCursor>>>,
    pub bloom: Vec<Option<Arc<dyn BloomFilter>>>,
    pub switch_txn: Vec<Option<TxnId>>,
    pub primary_chunk: Option<usize>,
    pub nupdates: usize,
    pub ngood: usize,
}

impl ChunkCursorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nchunks(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_stale(&self, tree: &LsmTree) -> bool {
        self.dsk_gen != tree.dsk_gen()
    }

    fn close_all(&mut self) {
        for c in self.cursors.drain(..) {
            if let Some(mut c) = c {
                let _ = c.close();
            }
        }
        self.bloom.clear();
        self.switch_txn.clear();
        self.primary_chunk = None;
    }

    /// §4.4 `open`: acquires (conceptually — the caller holds `tree`'s read
    /// guard for the duration) the tree's chunk array, computes the
    /// snapshot-visibility window `[ngood, nchunks)` that must be touched
    /// for conflict checking, and (re)opens a child cursor per chunk.
    pub fn open(
        &mut self,
        tree: &LsmTree,
        mode: OpenMode,
        txm: &Arc<dyn TransactionManager>,
        ckpt: &dyn Checkpointer,
    ) -> Result<()> {
        let chunks = tree.chunks.rl().clone();
        let nchunks = chunks.len();

        let (ngood, nupdates) = match mode {
            OpenMode::ReadOnly => (0, 0),
            OpenMode::UpdateNoSnapshot => (nchunks.saturating_sub(1), nchunks.min(1)),
            OpenMode::UpdateSnapshot => {
                let mut nupdates = 0usize;
                for chunk in chunks.iter().rev() {
                    match chunk.switch_txn() {
                        Some(t) if txm.is_visible_all(t) => break,
                        _ => nupdates += 1,
                    }
                }
                (nchunks - nupdates, nupdates)
            }
        };

        self.close_all();

        let mut cursors = Vec::with_capacity(nchunks);
        let mut bloom = Vec::with_capacity(nchunks);
        let mut switch_txn = Vec::with_capacity(nchunks);
        let mut primary_chunk = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let is_primary = i + 1 == nchunks && !chunk.is_ondisk() && chunk.switch_txn().is_none();

            let raw: Box<dyn ChildCursor> = if chunk.is_ondisk() && !chunk.is_empty() {
                match ckpt.open_checkpoint(chunk.id) {
                    Ok(c) => c,
                    Err(e) if e.is_not_found() => {
                        debug!("lsm: chunk {} has no checkpoint yet, falling back to live handle", chunk.id);
                        chunk.set_empty(true);
                        Box::new(chunk.store.open_cursor())
                    }
                    Err(e) => return Err(e),
                }
            } else {
                Box::new(chunk.store.open_cursor())
            };

            let cursor: Box<dyn ChildCursor> = if is_primary {
                raw
            } else {
                Box::new(ConflictCheckingCursor::new(raw, Arc::clone(txm)))
            };

            cursors.push(Some(cursor));
            bloom.push(chunk.bloom_filter());
            switch_txn.push(chunk.switch_txn());
            if is_primary {
                primary_chunk = Some(i);
            }
        }

        self.cursors = cursors;
        self.bloom = bloom;
        self.switch_txn = switch_txn;
        self.primary_chunk = primary_chunk;
        self.ngood = ngood;
        self.nupdates = nupdates;
        self.dsk_gen = tree.dsk_gen();

        debug!(
            "lsm: opened chunk cursor set, nchunks={} nupdates={} primary={:?} dsk_gen={}",
            nchunks, self.nupdates, self.primary_chunk, self.dsk_gen
        );
        Ok(())
    }

    /// §4.4 `close(start,end)`: closes the child cursor and Bloom handle
    /// over `[start, end)`.
    pub fn close_range(&mut self, start: usize, end: usize) {
        for i in start..end.min(self.cursors.len()) {
            if let Some(mut c) = self.cursors[i].take() {
                let _ = c.close();
            }
            self.bloom[i] = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::checkpointer::SimpleCheckpointer;
    use crate::collab::txn::SimpleTransactionManager;

    fn harness() -> (Arc<LsmTree>, Arc<dyn TransactionManager>, SimpleCheckpointer) {
        (
            Arc::new(LsmTree::new(1 << 20)),
            Arc::new(SimpleTransactionManager::new()),
            SimpleCheckpointer::new(),
        )
    }

    #[test]
    fn read_only_open_touches_no_chunks_for_conflict_checking() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        tree.append_new_primary();
        let mut set = ChunkCursorSet::new();
        set.open(&tree, OpenMode::ReadOnly, &txm, &ckpt).unwrap();
        assert_eq!(set.nupdates, 0);
        assert_eq!(set.cursors.len(), 2);
    }

    #[test]
    fn last_open_chunk_becomes_primary() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let mut set = ChunkCursorSet::new();
        set.open(&tree, OpenMode::UpdateNoSnapshot, &txm, &ckpt).unwrap();
        assert_eq!(set.primary_chunk, Some(0));
    }

    #[test]
    fn sealed_chunk_is_not_primary() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        tree.do_switch(1);
        let mut set = ChunkCursorSet::new();
        set.open(&tree, OpenMode::UpdateNoSnapshot, &txm, &ckpt).unwrap();
        assert_eq!(set.primary_chunk, Some(1));
        assert_eq!(set.nupdates, 1);
    }

    #[test]
    fn update_snapshot_stops_window_at_fully_visible_seal() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let t1 = txm.begin();
        tree.do_switch(t1);
        txm.end(t1);
        tree.append_new_primary();
        let mut set = ChunkCursorSet::new();
        set.open(&tree, OpenMode::UpdateSnapshot, &txm, &ckpt).unwrap();
        // the sealed chunk's switch_txn (t1) is visible to all live txns
        // (there are none live), so the window stops there: only the new
        // primary needs touching.
        assert_eq!(set.nupdates, 1);
    }
}
