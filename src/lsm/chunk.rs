//! §3 "LSM Tree": the ordered sequence of component chunks, newest-last, and
//! the tree-wide `dsk_gen`/`NEED_SWITCH` bookkeeping C4/C6 consult every time
//! the chunk array is reshaped.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::btree::page_id::ChunkId;
use crate::cache::Stats;
use crate::collab::bloom::{BloomFilter, SimpleBloomFilter};
use crate::collab::child_cursor::MemChunkStore;
use crate::collab::txn::TxnId;
use crate::utils::HandyRwLock;

/// sentinel for `Chunk::switch_txn`: the chunk is still the primary and has
/// not stopped accepting writes. Transaction ids are strictly positive, so
/// `0` is safe to reserve.
const NONE_TXN: u64 = 0;

/// One component B-tree. `store` is the out-of-scope "underlying B-tree"
/// this chunk's URI resolves to (§6 names the child cursor collaborator,
/// not how a URI becomes one; `MemChunkStore` is the reference handle every
/// chunk in this crate actually owns).
pub struct Chunk {
    pub id: ChunkId,
    pub uri: String,
    switch_txn: AtomicU64,
    ondisk: AtomicBool,
    empty: AtomicBool,
    pub bloom_uri: Option<String>,
    row_count: AtomicU64,
    pub store: Arc<MemChunkStore>,
    bloom_filter: Mutex<Option<Arc<dyn BloomFilter>>>,
}

impl Chunk {
    pub fn new_primary(id: ChunkId) -> Arc<Self> {
        Arc::new(Self {
            id,
            uri: format!("chunk-{}", id),
            switch_txn: AtomicU64::new(NONE_TXN),
            ondisk: AtomicBool::new(false),
            empty: AtomicBool::new(true),
            bloom_uri: None,
            row_count: AtomicU64::new(0),
            store: MemChunkStore::new(),
            bloom_filter: Mutex::new(None),
        })
    }

    pub fn switch_txn(&self) -> Option<TxnId> {
        match self.switch_txn.load(Ordering::SeqCst) {
            NONE_TXN => None,
            t => Some(t),
        }
    }

    pub fn seal(&self, at_txn: TxnId) {
        self.switch_txn.store(at_txn.max(1), Ordering::SeqCst);
    }

    pub fn is_ondisk(&self) -> bool {
        self.ondisk.load(Ordering::SeqCst)
    }

    pub fn set_ondisk(&self, v: bool) {
        self.ondisk.store(v, Ordering::SeqCst);
    }

    pub fn has_bloom(&self) -> bool {
        self.bloom_filter.lock().unwrap().is_some()
    }

    pub fn bloom_filter(&self) -> Option<Arc<dyn BloomFilter>> {
        self.bloom_filter.lock().unwrap().clone()
    }

    /// Builds and attaches a Bloom filter over every key currently in the
    /// chunk's store. Bloom-filter tuning is out of scope (§1); this uses a
    /// fixed 10-bits-per-key budget with 4 probes, built once at seal time
    /// the way a background checkpoint would build one from a sealed file.
    fn build_bloom(&self) {
        let keys = self.store.keys();
        if keys.is_empty() {
            return;
        }
        let mut bf = SimpleBloomFilter::new((keys.len() * 10).max(64), 4);
        for k in &keys {
            bf.insert(k);
        }
        *self.bloom_filter.lock().unwrap() = Some(Arc::new(bf));
    }

    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::SeqCst)
    }

    pub fn set_empty(&self, v: bool) {
        self.empty.store(v, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::SeqCst)
    }

    pub fn bump_row_count(&self, delta: i64) {
        if delta >= 0 {
            self.row_count.fetch_add(delta as u64, Ordering::SeqCst);
        } else {
            self.row_count.fetch_sub((-delta) as u64, Ordering::SeqCst);
        }
    }

    /// an approximation of the primary chunk's in-memory B-tree size, for
    /// the write-admission overflow check (§4.5). The reference store
    /// tracks entries, not bytes; one entry is treated as one size unit.
    pub fn approx_size(&self) -> u64 {
        self.store.len() as u64
    }
}

/// §3's LSM Tree: chunks newest-last, plus the generation counter that
/// every reshape (switch or merge) bumps.
pub struct LsmTree {
    pub chunks: RwLock<Vec<Arc<Chunk>>>,
    pub dsk_gen: AtomicU64,
    pub need_switch: AtomicBool,
    pub chunk_size: u64,
    next_chunk_id: AtomicU32,
    pub stats: Stats,
    /// microsecond delays a background checkpointer/merge worker asks
    /// foreground writers to pay (§4.6 throttling); zero means no pressure.
    ckpt_throttle_us: AtomicU64,
    merge_throttle_us: AtomicU64,
}

impl LsmTree {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            dsk_gen: AtomicU64::new(0),
            need_switch: AtomicBool::new(false),
            chunk_size,
            next_chunk_id: AtomicU32::new(0),
            stats: Stats::default(),
            ckpt_throttle_us: AtomicU64::new(0),
            merge_throttle_us: AtomicU64::new(0),
        }
    }

    pub fn ckpt_throttle_us(&self) -> u64 {
        self.ckpt_throttle_us.load(Ordering::Relaxed)
    }

    pub fn merge_throttle_us(&self) -> u64 {
        self.merge_throttle_us.load(Ordering::Relaxed)
    }

    /// test/worker hook: a background checkpointer announcing it wants
    /// foreground writers to slow down.
    pub fn set_ckpt_throttle_us(&self, us: u64) {
        self.ckpt_throttle_us.store(us, Ordering::Relaxed);
    }

    /// test/worker hook: a background merge announcing the same.
    pub fn set_merge_throttle_us(&self, us: u64) {
        self.merge_throttle_us.store(us, Ordering::Relaxed);
    }

    pub fn dsk_gen(&self) -> u64 {
        self.dsk_gen.load(Ordering::SeqCst)
    }

    fn bump_dsk_gen(&self) {
        self.dsk_gen.fetch_add(1, Ordering::SeqCst);
    }

    pub fn nchunks(&self) -> usize {
        self.chunks.rl().len()
    }

    pub fn need_switch(&self) -> bool {
        self.need_switch.load(Ordering::SeqCst)
    }

    /// sets NEED_SWITCH if it wasn't already set; returns whether this call
    /// was the one that set it (so a caller enqueues work at most once per
    /// switch cycle).
    pub fn request_switch(&self) -> bool {
        self.need_switch
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn alloc_chunk_id(&self) -> ChunkId {
        self.next_chunk_id.fetch_add(1, Ordering::SeqCst)
    }

    /// appends a fresh empty primary chunk; bumps `dsk_gen`. Used both for
    /// the very first write into an empty tree and after a switch.
    pub fn append_new_primary(&self) -> Arc<Chunk> {
        let chunk = Chunk::new_primary(self.alloc_chunk_id());
        self.chunks.wl().push(Arc::clone(&chunk));
        self.bump_dsk_gen();
        debug!("lsm: appended new primary chunk {}", chunk.id);
        chunk
    }

    /// seals the current primary (if any) at `at_txn` and appends a fresh
    /// one; this is the reshape the background LSM worker performs in
    /// response to a SWITCH work item (§4.5 write-admission).
    pub fn do_switch(&self, at_txn: TxnId) {
        let mut chunks = self.chunks.wl();
        if let Some(primary) = chunks.last() {
            if primary.switch_txn().is_none() {
                primary.seal(at_txn);
                primary.set_ondisk(true);
                primary.set_empty(primary.store.is_empty());
                primary.build_bloom();
                debug!("lsm: sealed chunk {} at txn {}", primary.id, at_txn);
            }
        }
        let chunk = Chunk::new_primary(self.alloc_chunk_id());
        chunks.push(chunk);
        drop(chunks);
        self.bump_dsk_gen();
        self.need_switch.store(false, Ordering::SeqCst);
    }
}
