//! The child B-tree cursor collaborator: §6 names
//! `{search, search_near, next, prev, insert, update, reset, close}` plus a
//! replaceable `insert` hook for conflict checking. Each LSM chunk is itself
//! a B-tree (PMRC's concern); the cursor interface below is what LMC drives
//! per chunk. `MemChunkCursor`/`MemChunkStore` are a minimal ordered-map
//! reference implementation, standing in for a real chunk B-tree the same
//! way `InMemoryBlockManager` stands in for the block manager.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::collab::txn::TxnId;
use crate::error::{Error, Result};

/// One stored entry: the value plus the txn that wrote it, so a
/// conflict-checking insert on a non-primary chunk can ask "who wrote this
/// key last".
#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    writer: TxnId,
}

/// A single chunk's backing store: an ordered byte-string map, behind a
/// mutex so cursors opened against the same chunk observe a consistent
/// ordering. Out of scope as a *B-tree* (PMRC already models that); this
/// exists purely so `ChildCursor` has real data to walk in tests.
pub struct MemChunkStore {
    entries: Mutex<BTreeMap<Vec<u8>, Entry>>,
}

impl MemChunkStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// every stored key, for building a chunk's Bloom filter at seal time.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn open_cursor(self: &Arc<Self>) -> MemChunkCursor {
        MemChunkCursor {
            store: Arc::clone(self),
            position: None,
        }
    }
}

/// Which direction `search_near` last landed relative to the requested key,
/// in the vocabulary spec §4.5 uses: 0 exact, 1 positioned above, -1 below.
pub type NearCmp = i32;

/// The child-cursor interface LMC drives per chunk.
pub trait ChildCursor: Send {
    fn search(&mut self, key: &[u8]) -> Result<bool>;
    fn search_near(&mut self, key: &[u8]) -> Result<NearCmp>;
    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;
    fn reset(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// plain insert, no conflict checking; used by the primary chunk.
    fn insert(&mut self, key: &[u8], value: &[u8], writer: TxnId) -> Result<()>;
    /// overwrite in place at the current position (spec's `put(... ,
    /// position=1)`); falls back to `insert` if nothing is positioned.
    fn update(&mut self, key: &[u8], value: &[u8], writer: TxnId) -> Result<()>;

    fn key(&self) -> Option<Vec<u8>>;
    fn value(&self) -> Option<Vec<u8>>;

    /// who last wrote the given key, for the conflict-checking insert hook;
    /// `None` if the key has never been written in this chunk.
    fn last_writer(&self, key: &[u8]) -> Result<Option<TxnId>>;
}

pub struct MemChunkCursor {
    store: Arc<MemChunkStore>,
    position: Option<Vec<u8>>,
}

impl ChildCursor for MemChunkCursor {
    fn search(&mut self, key: &[u8]) -> Result<bool> {
        let found = self.store.entries.lock().unwrap().contains_key(key);
        self.position = if found { Some(key.to_vec()) } else { None };
        Ok(found)
    }

    fn search_near(&mut self, key: &[u8]) -> Result<NearCmp> {
        let map = self.store.entries.lock().unwrap();
        if map.contains_key(key) {
            self.position = Some(key.to_vec());
            return Ok(0);
        }
        if let Some((k, _)) = map.range(key.to_vec()..).next() {
            self.position = Some(k.clone());
            return Ok(1);
        }
        if let Some((k, _)) = map.range(..key.to_vec()).next_back() {
            self.position = Some(k.clone());
            return Ok(-1);
        }
        self.position = None;
        Err(Error::not_found("chunk is empty"))
    }

    fn next(&mut self) -> Result<bool> {
        let map = self.store.entries.lock().unwrap();
        let nxt = match &self.position {
            None => map.iter().next(),
            Some(k) => map.range((std::ops::Bound::Excluded(k.clone()), std::ops::Bound::Unbounded)).next(),
        };
        match nxt {
            Some((k, _)) => {
                self.position = Some(k.clone());
                Ok(true)
            }
            None => {
                self.position = None;
                Ok(false)
            }
        }
    }

    fn prev(&mut self) -> Result<bool> {
        let map = self.store.entries.lock().unwrap();
        let prv = match &self.position {
            None => map.iter().next_back(),
            Some(k) => map.range(..k.clone()).next_back(),
        };
        match prv {
            Some((k, _)) => {
                self.position = Some(k.clone());
                Ok(true)
            }
            None => {
                self.position = None;
                Ok(false)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.position = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.position = None;
        Ok(())
    }

    fn insert(&mut self, key: &[u8], value: &[u8], writer: TxnId) -> Result<()> {
        trace!("chunk insert {:?} by txn {}", key, writer);
        self.store.entries.lock().unwrap().insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                writer,
            },
        );
        self.position = Some(key.to_vec());
        Ok(())
    }

    fn update(&mut self, key: &[u8], value: &[u8], writer: TxnId) -> Result<()> {
        self.insert(key, value, writer)
    }

    fn key(&self) -> Option<Vec<u8>> {
        self.position.clone()
    }

    fn value(&self) -> Option<Vec<u8>> {
        let k = self.position.as_ref()?;
        self.store.entries.lock().unwrap().get(k).map(|e| e.value.clone())
    }

    fn last_writer(&self, key: &[u8]) -> Result<Option<TxnId>> {
        Ok(self.store.entries.lock().unwrap().get(key).map(|e| e.writer))
    }
}

/// Wraps a plain `ChildCursor` with the conflict-checking insert hook C4
/// installs on every non-primary chunk: before delegating to the inner
/// cursor, consult the transaction manager with whoever last wrote this key.
pub struct ConflictCheckingCursor {
    inner: Box<dyn ChildCursor>,
    txm: Arc<dyn crate::collab::txn::TransactionManager>,
}

impl ConflictCheckingCursor {
    pub fn new(
        inner: Box<dyn ChildCursor>,
        txm: Arc<dyn crate::collab::txn::TransactionManager>,
    ) -> Self {
        Self { inner, txm }
    }
}

impl ChildCursor for ConflictCheckingCursor {
    fn search(&mut self, key: &[u8]) -> Result<bool> {
        self.inner.search(key)
    }

    fn search_near(&mut self, key: &[u8]) -> Result<NearCmp> {
        self.inner.search_near(key)
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn prev(&mut self) -> Result<bool> {
        self.inner.prev()
    }

    fn reset(&mut self) -> Result<()> {
        self.inner.reset()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn insert(&mut self, key: &[u8], value: &[u8], writer: TxnId) -> Result<()> {
        let last_writer = self.inner.last_writer(key)?;
        self.txm.check_conflict(writer, last_writer)?;
        self.inner.insert(key, value, writer)
    }

    fn update(&mut self, key: &[u8], value: &[u8], writer: TxnId) -> Result<()> {
        let last_writer = self.inner.last_writer(key)?;
        self.txm.check_conflict(writer, last_writer)?;
        self.inner.update(key, value, writer)
    }

    fn key(&self) -> Option<Vec<u8>> {
        self.inner.key()
    }

    fn value(&self) -> Option<Vec<u8>> {
        self.inner.value()
    }

    fn last_writer(&self, key: &[u8]) -> Result<Option<TxnId>> {
        self.inner.last_writer(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::txn::SimpleTransactionManager;

    #[test]
    fn search_near_picks_next_key_when_exact_miss() {
        let store = MemChunkStore::new();
        let mut c = store.open_cursor();
        c.insert(b"b", b"1", 1).unwrap();
        c.insert(b"d", b"2", 1).unwrap();
        assert_eq!(c.search_near(b"c").unwrap(), 1);
        assert_eq!(c.key(), Some(b"d".to_vec()));
    }

    #[test]
    fn conflict_checking_cursor_blocks_concurrent_writers() {
        let store = MemChunkStore::new();
        let txm: Arc<dyn crate::collab::txn::TransactionManager> =
            Arc::new(SimpleTransactionManager::new());
        let t1 = txm.begin();
        let t2 = txm.begin();
        let mut checked = ConflictCheckingCursor::new(Box::new(store.open_cursor()), Arc::clone(&txm));
        checked.insert(b"k", b"v1", t2).unwrap();
        let err = checked.insert(b"k", b"v2", t1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }
}
