//! The LSM merge-view cursor (LMC): an ordered, transactionally consistent
//! view across an arbitrary number of component chunks.
//!
//! `chunk` is the data model (§3's `Chunk`/`LsmTree`); `cursor_lifecycle` is
//! C4 (open/close the per-session array of child cursors); `merge_cursor` is
//! C5 (the merged next/prev/search/search_near iterator); `write` is C6 (the
//! insert/update/remove path, tombstone encoding, write-admission and
//! throttling); `tombstone` is the two-byte delete sentinel both C5 and C6
//! share.

pub mod chunk;
pub mod cursor_lifecycle;
pub mod merge_cursor;
pub mod tombstone;
pub mod write;

pub use chunk::{Chunk, LsmTree};
pub use cursor_lifecycle::{ChunkCursorSet, OpenMode};
pub use merge_cursor::MergeCursor;
pub use write::LsmWriter;
