//! C2: the page-in loop. Every descent through the tree funnels a `Ref`
//! through `page_in` to get a hazard-protected, resident `PageNode` back,
//! no matter which of the five states it started in.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;

use crate::btree::eviction::{forced_eviction_check, release_and_evict, EvictionConfig};
use crate::btree::page::{PageNode, PageType, Ref, RefState};
use crate::cache::{CacheAccountant, READGEN_NOTSET, READGEN_OLDEST};
use crate::collab::block_manager::BlockManager;
use crate::collab::txn::TransactionManager;
use crate::error::{Error, Result};
use crate::utils::backoff::Backoff;

/// Bits a caller sets to steer `page_in`'s behavior; named for what they
/// suppress or demand rather than bundled into a single opaque "mode" enum,
/// matching how the state table in §4.2 treats them independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageInFlags {
    /// never touch the block manager; a miss is NOTFOUND, not a read.
    pub cache_only: bool,
    /// don't block on a concurrent reader or evictor; NOTFOUND instead.
    pub no_wait: bool,
    /// skip the read-generation bump even if one would otherwise apply.
    pub no_gen: bool,
    /// this page is exempt from the forced-eviction gate.
    pub no_evict: bool,
    /// caller doesn't expect to revisit this page soon; flag it OLDEST.
    pub wont_need: bool,
}

impl PageInFlags {
    pub fn none() -> Self {
        Self::default()
    }
}

const MAX_FORCED_EVICT_ATTEMPTS: u32 = 10;

/// The result of a successful `page_in`: a hazard-protected page. Dropping
/// this clears the hazard, the way a real guard type would — callers must
/// not let `ref.page()` outlive it.
pub struct Hazard {
    r: Arc<Ref>,
    pub page: Arc<PageNode>,
}

impl Drop for Hazard {
    fn drop(&mut self) {
        self.r.clear_hazard();
    }
}

/// Walks `r` through DISK/READING/LOCKED/SPLIT/MEM until it lands
/// hazard-protected in MEM, or a terminal condition (NOTFOUND, RESTART, or
/// a propagated I/O error) ends the loop.
#[allow(clippy::too_many_arguments)]
pub fn page_in(
    r: &Arc<Ref>,
    page_type: PageType,
    flags: PageInFlags,
    cache: &CacheAccountant,
    block_manager: &dyn BlockManager,
    txm: &dyn TransactionManager,
    evict_cfg: &EvictionConfig,
) -> Result<Hazard> {
    let mut backoff = Backoff::page_in();
    let mut forced_evict_attempts: u32 = 0;

    loop {
        match r.state() {
            RefState::Disk | RefState::Deleted => {
                if flags.cache_only {
                    return Err(Error::not_found("page not resident and CACHE_ONLY set"));
                }
                if cache.is_under_pressure() {
                    trace!("page_in: cache under pressure, reading anyway (eviction is the background worker's job)");
                }
                match block_manager.read(cache, r) {
                    Ok(()) => {}
                    Err(e) if e.is_busy() => {
                        cache.stats.page_read_blocked.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => return Err(e),
                }
                backoff.reset();
            }
            RefState::Reading => {
                if flags.cache_only || flags.no_wait {
                    return Err(Error::not_found("page is being read and NO_WAIT set"));
                }
                cache.stats.page_read_blocked.fetch_add(1, Ordering::Relaxed);
                backoff.step();
                cache.stats.add_sleep(backoff.total_sleep_us);
            }
            RefState::Locked => {
                if flags.no_wait {
                    return Err(Error::not_found("page is locked for eviction and NO_WAIT set"));
                }
                cache.stats.page_locked_blocked.fetch_add(1, Ordering::Relaxed);
                backoff.step();
            }
            RefState::Split => {
                return Err(Error::restart("subtree reshaped, re-descend from an ancestor"));
            }
            RefState::Mem => {
                let page = match r.install_hazard() {
                    Some(p) => p,
                    None => {
                        cache.stats.page_busy_blocked.fetch_add(1, Ordering::Relaxed);
                        backoff.step();
                        continue;
                    }
                };

                // post-check 1: forced eviction.
                if forced_evict_attempts < MAX_FORCED_EVICT_ATTEMPTS
                    && forced_eviction_check(evict_cfg, &page, page_type, flags.no_evict)
                {
                    r.clear_hazard();
                    match release_and_evict(r, cache, block_manager) {
                        Ok(()) => {
                            forced_evict_attempts += 1;
                            cache
                                .stats
                                .page_forcible_evict_blocked
                                .fetch_add(1, Ordering::Relaxed);
                            backoff.reset();
                            continue;
                        }
                        Err(e) if e.is_busy() => {
                            forced_evict_attempts += 1;
                            backoff.step();
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }

                // post-check 2: autocommit.
                if let Err(e) = txm.autocommit_check() {
                    r.clear_hazard();
                    return Err(e);
                }

                // post-check 3: generation update.
                let current_epoch = cache.current_epoch();
                if flags.wont_need && page.read_gen() == READGEN_NOTSET {
                    page.set_read_gen(READGEN_OLDEST);
                } else if !flags.no_gen
                    && page.read_gen() != READGEN_OLDEST
                    && page.read_gen() < current_epoch
                {
                    page.set_read_gen(cache.fresh_epoch());
                }

                return Ok(Hazard { r: Arc::clone(r), page });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::page::body::{PageBody, RowLeaf};
    use crate::collab::cell_codec::{DiskPageBuilder, SimpleCellCodec};
    use crate::collab::txn::SimpleTransactionManager;

    fn harness() -> (
        CacheAccountant,
        crate::collab::block_manager::InMemoryBlockManager,
        SimpleTransactionManager,
        EvictionConfig,
    ) {
        (
            CacheAccountant::new(1 << 20),
            crate::collab::block_manager::InMemoryBlockManager::new(Arc::new(SimpleCellCodec), 0),
            SimpleTransactionManager::new(),
            EvictionConfig::default(),
        )
    }

    fn mem_leaf(footprint: usize) -> Arc<PageNode> {
        Arc::new(PageNode::new(
            PageBody::RowLeaf(RowLeaf {
                entry_count: 0,
                slots: Vec::new(),
            }),
            footprint,
        ))
    }

    #[test]
    fn pages_in_a_disk_ref_and_installs_a_hazard() {
        let (cache, bm, txm, cfg) = harness();
        let image = DiskPageBuilder::new(PageType::RowLeaf)
            .key_cell(b"a")
            .value_cell(b"1")
            .build();
        let addr = bm.seed(image);
        let r = Ref::new_disk(addr);
        let hazard =
            page_in(&r, PageType::RowLeaf, PageInFlags::none(), &cache, &bm, &txm, &cfg).unwrap();
        assert_eq!(r.state(), RefState::Mem);
        assert_eq!(r.hazard_count(), 1);
        drop(hazard);
        assert_eq!(r.hazard_count(), 0);
    }

    #[test]
    fn cache_only_misses_a_disk_ref() {
        let (cache, bm, txm, cfg) = harness();
        let r = Ref::new_disk(crate::btree::page_id::Address::new(0, 1));
        let flags = PageInFlags {
            cache_only: true,
            ..PageInFlags::none()
        };
        let err = page_in(&r, PageType::RowLeaf, flags, &cache, &bm, &txm, &cfg).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn split_state_surfaces_restart() {
        let (cache, bm, txm, cfg) = harness();
        let r = Ref::new_mem(mem_leaf(16));
        r.mark_split();
        let err =
            page_in(&r, PageType::RowLeaf, PageInFlags::none(), &cache, &bm, &txm, &cfg).unwrap_err();
        assert!(err.is_restart());
    }

    #[test]
    fn autocommit_failure_releases_hazard_and_propagates() {
        let (cache, bm, _txm, cfg) = harness();
        let txm = SimpleTransactionManager::new();
        txm.set_autocommit_enabled(false);
        let r = Ref::new_mem(mem_leaf(16));
        let err =
            page_in(&r, PageType::RowLeaf, PageInFlags::none(), &cache, &bm, &txm, &cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
        assert_eq!(r.hazard_count(), 0);
    }

    #[test]
    fn wont_need_flags_a_fresh_page_oldest() {
        let (cache, bm, txm, cfg) = harness();
        let r = Ref::new_mem(mem_leaf(16));
        let flags = PageInFlags {
            wont_need: true,
            ..PageInFlags::none()
        };
        let hazard = page_in(&r, PageType::RowLeaf, flags, &cache, &bm, &txm, &cfg).unwrap();
        assert_eq!(hazard.page.read_gen(), READGEN_OLDEST);
    }

    #[test]
    fn ordinary_touch_assigns_a_fresh_epoch() {
        let (cache, bm, txm, cfg) = harness();
        let r = Ref::new_mem(mem_leaf(16));
        let hazard =
            page_in(&r, PageType::RowLeaf, PageInFlags::none(), &cache, &bm, &txm, &cfg).unwrap();
        assert!(hazard.page.read_gen() >= 2);
    }

    #[test]
    fn forced_eviction_fires_and_moves_the_ref_off_mem() {
        let (cache, bm, txm, _cfg) = harness();
        let page = mem_leaf(1000);
        page.mark_dirty(1000);
        let r = Ref::new_mem(Arc::clone(&page));
        cache.account_alloc(1000);
        let cfg = EvictionConfig {
            maxmempage: 10,
            eviction_disabled: false,
        };
        // the reference block manager's `write` stores a placeholder image it
        // cannot re-materialize (see its own doc comment), so the loop's
        // attempt to page the evicted ref back in surfaces that as an error
        // rather than succeeding — what matters here is that forced eviction
        // actually ran and took the ref off MEM before that happened.
        let err =
            page_in(&r, PageType::RowLeaf, PageInFlags::none(), &cache, &bm, &txm, &cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
        assert_ne!(r.state(), RefState::Mem);
    }

    #[test]
    fn no_evict_flag_exempts_an_oversized_page() {
        let (cache, bm, txm, _cfg) = harness();
        let page = mem_leaf(1000);
        page.mark_dirty(1000);
        let r = Ref::new_mem(Arc::clone(&page));
        cache.account_alloc(1000);
        let cfg = EvictionConfig {
            maxmempage: 10,
            eviction_disabled: false,
        };
        let flags = PageInFlags {
            no_evict: true,
            ..PageInFlags::none()
        };
        let hazard = page_in(&r, PageType::RowLeaf, flags, &cache, &bm, &txm, &cfg).unwrap();
        drop(hazard);
        assert_eq!(r.state(), RefState::Mem);
    }
}
