//! Paged B-tree substrate: page residency control (PMRC).
//!
//! `page` defines the physical page types and the `Ref` state machine;
//! `alloc` builds in-memory pages from disk images; `page_cache` is the
//! page-in loop every reader goes through; `eviction` is the forced-eviction
//! gate the page-in loop consults on its way out.

pub mod alloc;
pub mod eviction;
pub mod page;
pub mod page_cache;
pub mod page_id;
