//! The block manager collaborator: §6 names `read(ref) -> (bytes, size)`,
//! performing the DISK/DELETED -> READING -> MEM CAS sequence and acting as
//! the sole source of disk images. Physical block allocation is a named
//! non-goal; `InMemoryBlockManager` below is a reference implementation
//! backed by a plain map instead of a real block layer, so PMRC has
//! something real to page in during tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use crate::btree::alloc;
use crate::btree::page::{PageNode, Ref, RefState};
use crate::btree::page_id::{Address, ChunkId};
use crate::cache::CacheAccountant;
use crate::collab::cell_codec::CellCodec;
use crate::error::{Error, Result};

pub trait BlockManager: Send + Sync {
    /// Materializes `r` from its backing image. Returns `Busy` if another
    /// thread already claimed the read; the page-in loop treats that as
    /// "fall through to backoff", not as a hard failure.
    fn read(&self, cache: &CacheAccountant, r: &Arc<Ref>) -> Result<()>;

    /// Writes a page's current in-memory contents back and returns the
    /// address it now lives at; used by forced eviction to reclaim a dirty
    /// leaf.
    fn write(&self, page: &PageNode) -> Result<Address>;
}

pub struct InMemoryBlockManager {
    codec: Arc<dyn CellCodec>,
    images: Mutex<HashMap<Address, Vec<u8>>>,
    next_offset: AtomicU64,
    chunk: ChunkId,
}

impl InMemoryBlockManager {
    pub fn new(codec: Arc<dyn CellCodec>, chunk: ChunkId) -> Self {
        Self {
            codec,
            images: Mutex::new(HashMap::new()),
            next_offset: AtomicU64::new(1),
            chunk,
        }
    }

    /// Seeds a disk image at a fresh address and returns it, for tests that
    /// want a `Ref::new_disk` to page in real content.
    pub fn seed(&self, image: Vec<u8>) -> Address {
        let addr = self.alloc_address();
        self.images.lock().unwrap().insert(addr, image);
        addr
    }

    pub fn put_image(&self, addr: Address, image: Vec<u8>) {
        self.images.lock().unwrap().insert(addr, image);
    }

    fn alloc_address(&self) -> Address {
        Address::new(self.chunk, self.next_offset.fetch_add(1, Ordering::Relaxed))
    }
}

impl BlockManager for InMemoryBlockManager {
    fn read(&self, cache: &CacheAccountant, r: &Arc<Ref>) -> Result<()> {
        let prior = r
            .try_begin_read()
            .ok_or_else(|| Error::busy("ref already claimed for reading"))?;
        trace!("block manager reading {}", r.addr());

        let addr = r.addr();
        let image = {
            let images = self.images.lock().unwrap();
            match images.get(&addr) {
                Some(bytes) => bytes.clone(),
                None => {
                    r.abort_read(prior);
                    return Err(Error::not_found(format!("no image at {}", addr)));
                }
            }
        };

        match alloc::materialize(&*self.codec, &image) {
            Ok(page) => {
                cache.account_alloc(page.memory_footprint());
                r.finish_read(Arc::new(page));
                Ok(())
            }
            Err(e) => {
                r.abort_read(prior);
                Err(e)
            }
        }
    }

    fn write(&self, _page: &PageNode) -> Result<Address> {
        // re-encoding a page is a cell-codec concern this crate does not
        // own (§6 lists the codec as an interface, not an encoder); forced
        // eviction only needs a fresh address to move the ref to DISK at,
        // so write back an empty placeholder image under it.
        let addr = self.alloc_address();
        self.images.lock().unwrap().insert(addr, Vec::new());
        debug!("wrote back page to {}", addr);
        Ok(addr)
    }
}
