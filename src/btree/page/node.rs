use std::sync::{atomic::AtomicU64, atomic::AtomicUsize, atomic::Ordering, Mutex, RwLock, Weak};

use super::body::PageBody;
use super::page_ref::Ref;
use crate::cache::READGEN_NOTSET;
use crate::utils::HandyRwLock;

/// A dirty page's pending in-memory modifications, tracked only well enough
/// for the forced-eviction gate (C3) to see "this page has unwritten
/// changes" — the actual update log belongs to the transaction manager
/// collaborator, not to PMRC.
#[derive(Default)]
pub struct Modify {
    pub dirty_bytes: usize,
}

/// A materialized page. Owned by exactly one `Ref` (the one that
/// transitioned it into `Mem`); children, if any, are owned by this page's
/// `PageBody::*Internal` index, and this page's own back-reference to its
/// parent `Ref` is a non-owning `Weak` so the ownership graph has no cycles.
pub struct PageNode {
    pub read_gen: AtomicU64,
    pub memory_footprint: AtomicUsize,
    pub modify: RwLock<Option<Modify>>,
    parent_ref: Mutex<Option<Weak<Ref>>>,
    pub body: RwLock<PageBody>,
}

impl PageNode {
    pub fn new(body: PageBody, memory_footprint: usize) -> Self {
        Self {
            read_gen: AtomicU64::new(READGEN_NOTSET),
            memory_footprint: AtomicUsize::new(memory_footprint),
            modify: RwLock::new(None),
            parent_ref: Mutex::new(None),
            body: RwLock::new(body),
        }
    }

    pub fn set_parent_ref(&self, parent: Weak<Ref>) {
        *self.parent_ref.lock().unwrap() = Some(parent);
    }

    pub fn parent_ref(&self) -> Option<std::sync::Arc<Ref>> {
        self.parent_ref.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub fn is_dirty(&self) -> bool {
        self.modify.rl().is_some()
    }

    pub fn mark_dirty(&self, extra_bytes: usize) {
        let mut guard = self.modify.wl();
        match guard.as_mut() {
            Some(m) => m.dirty_bytes += extra_bytes,
            None => *guard = Some(Modify { dirty_bytes: extra_bytes }),
        }
    }

    pub fn read_gen(&self) -> u64 {
        self.read_gen.load(Ordering::Relaxed)
    }

    pub fn set_read_gen(&self, gen: u64) {
        self.read_gen.store(gen, Ordering::Relaxed);
    }

    pub fn memory_footprint(&self) -> usize {
        self.memory_footprint.load(Ordering::Relaxed)
    }
}
