//! C3: the forced-eviction gate. The page-in loop (C2) consults this on
//! every successful hazard install so an over-budget dirty leaf gets shed
//! opportunistically instead of waiting for the next full eviction sweep.

use std::sync::Arc;

use log::debug;

use crate::btree::page::{PageNode, PageType, Ref};
use crate::cache::{CacheAccountant, READGEN_OLDEST};
use crate::collab::block_manager::BlockManager;
use crate::error::{Error, Result};

/// The handful of knobs §4.3's gate consults; lives on the tree/session the
/// way `btree.maxmempage` does in the source.
#[derive(Debug, Clone, Copy)]
pub struct EvictionConfig {
    pub maxmempage: usize,
    /// tree-wide kill switch (§5: disabled while a chunk is primary).
    pub eviction_disabled: bool,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            maxmempage: 5 * 1024 * 1024,
            eviction_disabled: false,
        }
    }
}

/// §4.3's predicate: true iff every one of the listed conditions holds.
/// Clean pages are exempt so read-heavy workloads don't churn; internal
/// pages are exempt because force-evicting one mid-descent would
/// destabilize every in-flight traversal through it.
pub fn forced_eviction_check(
    cfg: &EvictionConfig,
    page: &PageNode,
    page_type: PageType,
    no_evict: bool,
) -> bool {
    if no_evict || cfg.eviction_disabled {
        return false;
    }
    if !page_type.is_leaf() {
        return false;
    }
    if page.memory_footprint() < cfg.maxmempage {
        return false;
    }
    page.is_dirty()
}

/// §4.3's second half: when the gate fires, flag the page for soft eviction
/// and ask the eviction subsystem whether it can be reclaimed immediately.
/// `Busy` means another evictor (or a live hazard) is in the way; the
/// page-in loop treats that as ordinary backoff. Any other error propagates.
pub fn release_and_evict(
    r: &Arc<Ref>,
    cache: &CacheAccountant,
    block_manager: &dyn BlockManager,
) -> Result<()> {
    let page = r
        .page()
        .ok_or_else(|| Error::fatal("release_and_evict called on a ref with no page"))?;
    page.set_read_gen(READGEN_OLDEST);

    if !r.try_lock_for_eviction() {
        debug!("forced eviction: MEM->LOCKED CAS lost, a hazard is still live");
        return Err(Error::busy("page has a live hazard"));
    }

    let write_result = block_manager.write(&page);
    match write_result {
        Ok(new_addr) => {
            cache.account_free(page.memory_footprint());
            r.finish_evict_to_disk(new_addr);
            debug!("forced eviction: wrote back dirty leaf to {}", new_addr);
            Ok(())
        }
        Err(e) => {
            r.unlock_to_mem();
            Err(e)
        }
    }
}
