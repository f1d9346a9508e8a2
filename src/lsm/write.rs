//! C6: the write path. `LsmWriter` is the write-side counterpart to
//! `MergeCursor` (C5) — same `ChunkCursorSet` underneath (C4), opened in an
//! update mode instead of read-only, admitting writes per §4.5's
//! write-admission protocol before ever touching a chunk cursor.
//!
//! Split from `MergeCursor` the way this crate's module map lays out C5 and
//! C6 as siblings sharing C4, rather than one God cursor type carrying both
//! read and write state; a session wanting both simply owns one of each.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::collab::checkpointer::Checkpointer;
use crate::collab::lsm_manager::LsmManager;
use crate::collab::txn::{TransactionManager, TxnId};
use crate::error::{Error, Result};
use crate::lsm::chunk::LsmTree;
use crate::lsm::cursor_lifecycle::{ChunkCursorSet, OpenMode};
use crate::lsm::tombstone;
use crate::utils::backoff::spin_until;
use crate::utils::HandyRwLock;

const THROTTLE_PERIOD: u64 = 100;

pub struct LsmWriter {
    tree: Arc<LsmTree>,
    txm: Arc<dyn TransactionManager>,
    lsm_manager: Option<Arc<dyn LsmManager>>,
    set: Mutex<ChunkCursorSet>,
    primary_writes: AtomicU64,
    total_writes: AtomicU64,
}

impl LsmWriter {
    pub fn new(tree: Arc<LsmTree>, txm: Arc<dyn TransactionManager>) -> Self {
        Self {
            tree,
            txm,
            lsm_manager: None,
            set: Mutex::new(ChunkCursorSet::new()),
            primary_writes: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
        }
    }

    pub fn with_lsm_manager(mut self, mgr: Arc<dyn LsmManager>) -> Self {
        self.lsm_manager = Some(mgr);
        self
    }

    /// §4.5 `Enter(reset=0, update=1)`: make sure the cursor set reflects
    /// the tree's current shape, then run write-admission until a write is
    /// actually safe to make.
    fn enter_for_write(&self, ckpt: &dyn Checkpointer) -> Result<()> {
        loop {
            self.txm.autocommit_check()?;

            {
                let mut set = self.set.lock().unwrap();
                if set.is_stale(&self.tree) || set.nchunks() == 0 {
                    set.open(&self.tree, OpenMode::UpdateSnapshot, &self.txm, ckpt)?;
                }
            }

            if self.admit_write(ckpt)? {
                return Ok(());
            }
            // admission spun until the tree reshaped; resync before retrying.
            let mut set = self.set.lock().unwrap();
            set.open(&self.tree, OpenMode::UpdateSnapshot, &self.txm, ckpt)?;
        }
    }

    /// §4.5 write-admission. Returns `Ok(true)` once it is safe to write
    /// against the currently-open cursor set, `Ok(false)` if the tree
    /// reshaped out from under it and the caller must resync first.
    fn admit_write(&self, ckpt: &dyn Checkpointer) -> Result<bool> {
        let gen_before = self.tree.dsk_gen();
        let primary_idx = {
            let set = self.set.lock().unwrap();
            set.primary_chunk
        };

        let primary = match primary_idx {
            Some(idx) => {
                let chunks = self.tree.chunks.rl();
                chunks.get(idx).cloned()
            }
            None => None,
        };

        let hard_limit = self.tree.chunk_size.saturating_mul(2);

        match primary {
            Some(chunk) => {
                let size = chunk.approx_size();
                if size >= self.tree.chunk_size {
                    self.request_switch();
                }
                if size < hard_limit {
                    return Ok(true);
                }
                debug!(
                    "lsm write-admission: primary chunk {} past hard limit ({} >= {}), spinning for a switch",
                    chunk.id, size, hard_limit
                );
            }
            None => {
                debug!("lsm write-admission: no primary chunk, spinning until one exists");
            }
        }

        spin_until(
            || self.tree.nchunks() > 0 && self.tree.dsk_gen() != gen_before,
            1000,
            10,
            || self.request_switch(),
        );
        let _ = ckpt; // reserved: a real admission gate may consult ckpt state too.
        Ok(false)
    }

    fn request_switch(&self) {
        if self.tree.request_switch() {
            if let Some(mgr) = &self.lsm_manager {
                mgr.push_switch(Arc::clone(&self.tree));
            }
        }
    }

    fn throttle(&self) {
        let primary = self.primary_writes.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total_writes.fetch_add(1, Ordering::Relaxed) + 1;
        if primary % THROTTLE_PERIOD != 0 && total % THROTTLE_PERIOD != 0 {
            return;
        }
        let ckpt_us = self.tree.ckpt_throttle_us();
        let merge_us = self.tree.merge_throttle_us();
        if ckpt_us == 0 && merge_us == 0 {
            return;
        }
        if ckpt_us > 0 {
            self.tree.stats.lsm_checkpoint_throttle.fetch_add(1, Ordering::Relaxed);
        }
        if merge_us > 0 {
            self.tree.stats.lsm_merge_throttle.fetch_add(1, Ordering::Relaxed);
        }
        std::thread::sleep(std::time::Duration::from_micros(ckpt_us + merge_us));
    }

    /// §4.6 `put(key, value, position)`: the low-level positional write. No
    /// tombstone escaping happens here — callers (`insert`/`update`/`remove`)
    /// decide what bytes get stored. `position` picks the primary chunk's
    /// verb: `update` when the caller already knows the key is positioned
    /// there, `insert` otherwise. Writes the newest `nupdates` chunks,
    /// descending from the primary, stopping early once a chunk's seal is
    /// visible to every live transaction (older chunks need no conflict
    /// check at that point).
    pub fn put(
        &self,
        key: &[u8],
        value: &[u8],
        txn: TxnId,
        position: bool,
        ckpt: &dyn Checkpointer,
    ) -> Result<()> {
        self.enter_for_write(ckpt)?;

        let mut set = self.set.lock().unwrap();
        let nchunks = set.nchunks();
        let mut nupdates = set.nupdates;
        let primary_idx = set
            .primary_chunk
            .ok_or_else(|| Error::fatal("write-admission succeeded with no primary chunk"))?;
        if primary_idx + 1 != nchunks {
            return Err(Error::fatal("primary chunk is not the newest chunk"));
        }

        let mut i = 0;
        while i < nupdates {
            let slot = nchunks - 1 - i;
            if i > 0 {
                if let Some(t) = set.switch_txn[slot] {
                    if self.txm.is_visible_all(t) {
                        nupdates = i;
                        break;
                    }
                }
            }

            let cursor = set.cursors[slot]
                .as_mut()
                .ok_or_else(|| Error::fatal("write-admission opened a null cursor slot"))?;
            if i == 0 && position {
                cursor.update(key, value, txn)?;
            } else {
                cursor.insert(key, value, txn)?;
            }
            i += 1;
        }
        set.nupdates = nupdates;
        drop(set);

        self.throttle();
        Ok(())
    }

    /// §4.6 `insert(k,v)`: fails with `DuplicateKey` unless `overwrite` is
    /// set or the key is genuinely absent.
    pub fn insert(
        &self,
        key: &[u8],
        value: &[u8],
        txn: TxnId,
        overwrite: bool,
        ckpt: &dyn Checkpointer,
    ) -> Result<()> {
        if !overwrite && self.lookup(key, ckpt)?.is_some() {
            return Err(Error::duplicate_key(format!(
                "key already present: {:?}",
                key
            )));
        }
        let encoded = tombstone::encode(value);
        self.put(key, &encoded, txn, false, ckpt)
    }

    /// §4.6 `update(k,v)`: succeeds when `overwrite` is set or the key
    /// already exists; otherwise `NotFound`.
    pub fn update(
        &self,
        key: &[u8],
        value: &[u8],
        txn: TxnId,
        overwrite: bool,
        ckpt: &dyn Checkpointer,
    ) -> Result<()> {
        if !overwrite && self.lookup(key, ckpt)?.is_none() {
            return Err(Error::not_found(format!("key not present: {:?}", key)));
        }
        let encoded = tombstone::encode(value);
        self.put(key, &encoded, txn, true, ckpt)
    }

    /// §4.6 `remove(k)`: writes the literal tombstone (never escaped — it is
    /// the sentinel itself, not an application value that merely starts
    /// with its prefix).
    pub fn remove(&self, key: &[u8], txn: TxnId, ckpt: &dyn Checkpointer) -> Result<()> {
        self.put(key, &tombstone::TOMBSTONE, txn, true, ckpt)
    }

    /// A point lookup used only by `insert`/`update` to decide duplicate
    /// key / not-found semantics; independent of any `MergeCursor` a caller
    /// may also hold, the way §4.6 describes `insert`/`update` calling
    /// `lookup` directly rather than sharing position with a scan.
    fn lookup(&self, key: &[u8], ckpt: &dyn Checkpointer) -> Result<Option<Vec<u8>>> {
        self.enter_for_write(ckpt)?;
        let mut set = self.set.lock().unwrap();
        for i in (0..set.nchunks()).rev() {
            let cursor = set.cursors[i]
                .as_mut()
                .ok_or_else(|| Error::fatal("write-admission opened a null cursor slot"))?;
            if cursor.search(key)? {
                let value = cursor
                    .value()
                    .ok_or_else(|| Error::fatal("matched cursor must be positioned"))?;
                return Ok(if tombstone::is_tombstone(&value) {
                    None
                } else {
                    Some(tombstone::decode(&value))
                });
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::checkpointer::SimpleCheckpointer;
    use crate::collab::lsm_manager::SimpleLsmManager;
    use crate::collab::txn::SimpleTransactionManager;

    fn harness() -> (Arc<LsmTree>, Arc<dyn TransactionManager>, SimpleCheckpointer) {
        (
            Arc::new(LsmTree::new(1 << 20)),
            Arc::new(SimpleTransactionManager::new()),
            SimpleCheckpointer::new(),
        )
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm));
        writer.insert(b"a", b"1", 1, false, &ckpt).unwrap();
        assert_eq!(writer.lookup(b"a", &ckpt).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn insert_without_overwrite_rejects_duplicate() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm));
        writer.insert(b"a", b"1", 1, false, &ckpt).unwrap();
        let err = writer.insert(b"a", b"2", 1, false, &ckpt).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DuplicateKey);
        assert_eq!(writer.lookup(b"a", &ckpt).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn update_without_overwrite_requires_existing_key() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm));
        let err = writer.update(b"a", b"1", 1, false, &ckpt).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn remove_then_lookup_is_not_found() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm));
        writer.insert(b"a", b"1", 1, false, &ckpt).unwrap();
        writer.remove(b"a", 1, &ckpt).unwrap();
        assert_eq!(writer.lookup(b"a", &ckpt).unwrap(), None);
    }

    #[test]
    fn tombstone_prefixed_value_survives_round_trip() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm));
        let v = [0x14, 0x14, 99];
        writer.insert(b"a", &v, 1, false, &ckpt).unwrap();
        assert_eq!(writer.lookup(b"a", &ckpt).unwrap(), Some(v.to_vec()));
    }

    #[test]
    fn zero_chunk_write_spins_until_a_background_switch_creates_one() {
        let tree = Arc::new(LsmTree::new(1 << 20));
        let txm: Arc<dyn TransactionManager> = Arc::new(SimpleTransactionManager::new());
        let ckpt = SimpleCheckpointer::new();
        let mgr = SimpleLsmManager::new(Arc::clone(&txm));
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm)).with_lsm_manager(mgr);

        assert_eq!(tree.nchunks(), 0);
        writer.insert(b"a", b"1", 1, false, &ckpt).unwrap();
        assert!(tree.nchunks() >= 1);
        assert_eq!(writer.lookup(b"a", &ckpt).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn writer_throttles_when_background_work_requests_it() {
        let (tree, txm, ckpt) = harness();
        tree.append_new_primary();
        tree.set_ckpt_throttle_us(50);
        let writer = LsmWriter::new(Arc::clone(&tree), Arc::clone(&txm));
        for i in 0..100u32 {
            writer
                .insert(i.to_be_bytes().as_ref(), b"v", 1, true, &ckpt)
                .unwrap();
        }
        assert!(
            tree.stats
                .lsm_checkpoint_throttle
                .load(Ordering::Relaxed)
                >= 1
        );
    }
}
