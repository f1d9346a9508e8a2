use super::page_ref::Ref;
use crate::btree::page_id::Address;
use std::sync::Arc;

/// The five physical page types a disk image can unpack into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    ColumnFixedLeaf,
    ColumnInternal,
    ColumnVariableLeaf,
    RowInternal,
    RowLeaf,
}

impl PageType {
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            PageType::ColumnFixedLeaf | PageType::ColumnVariableLeaf | PageType::RowLeaf
        )
    }

    pub fn is_internal(self) -> bool {
        matches!(self, PageType::ColumnInternal | PageType::RowInternal)
    }
}

/// An ordered sequence of owned child `Ref`s, shared by column-internal and
/// row-internal pages.
pub struct InternalIndex {
    /// column-store internal pages number children by starting record number.
    pub starting_recno: Option<u64>,
    /// row-store internal pages carry an explicit separator key per child;
    /// `None` for column-store, where position implies the key.
    pub entry_keys: Option<Vec<Vec<u8>>>,
    pub refs: Vec<Arc<Ref>>,
}

impl InternalIndex {
    pub fn new() -> Self {
        Self {
            starting_recno: None,
            entry_keys: None,
            refs: Vec::new(),
        }
    }

    /// the separator key for child `i`, for a row-store internal page.
    pub fn key_at(&self, i: usize) -> Option<&[u8]> {
        self.entry_keys.as_ref().and_then(|k| k.get(i)).map(|v| v.as_slice())
    }
}

impl Default for InternalIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ColumnFixedLeaf {
    pub starting_recno: u64,
    pub entry_count: u32,
    /// packed bitfield, one entry per bit-width unit; kept as an owned copy
    /// rather than a pointer into a disk image.
    pub bitf: Vec<u8>,
}

/// a run of repeated identical values, as produced by RLE-compressed
/// column-variable disk images.
#[derive(Debug, Clone, Copy)]
pub struct RleEntry {
    pub slot_index: u32,
    pub starting_recno: u64,
    pub repeat_count: u64,
}

pub struct ColumnVariableLeaf {
    pub starting_recno: u64,
    pub entry_count: u32,
    /// one offset per logical slot (post-RLE-expansion count), each
    /// pointing at the physical cell backing that slot.
    pub cell_offsets: Vec<u32>,
    /// present only when the disk image actually contained repeated
    /// values; `None` is the common case.
    pub repeats: Option<Vec<RleEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSlotTag {
    /// key bytes live inline on the page image, no cell indirection needed.
    KeyOnPage,
    /// key requires unpacking through a cell (possibly overflow).
    KeyCell,
    /// key and value were packed into a single cell.
    KeyValueCell,
}

pub struct RowSlot {
    pub tag: RowSlotTag,
    pub key: Vec<u8>,
    /// `None` until a separate value cell (or the key/value cell itself)
    /// attaches one; row-store values are optional (a zero-length value is
    /// legal and distinct from "no value cell yet").
    pub value: Option<Vec<u8>>,
}

pub struct RowLeaf {
    pub entry_count: u32,
    pub slots: Vec<RowSlot>,
}

/// The in-memory representation of a materialized page: a closed, tagged
/// union over the five physical page types. Matching on `PageBody` instead
/// of relying on trait objects keeps the per-type dispatch exhaustive at
/// compile time, the same shape `alloc::materialize` builds it in.
pub enum PageBody {
    ColumnFixedLeaf(ColumnFixedLeaf),
    ColumnInternal(InternalIndex),
    ColumnVariableLeaf(ColumnVariableLeaf),
    RowInternal(InternalIndex),
    RowLeaf(RowLeaf),
}

impl PageBody {
    pub fn page_type(&self) -> PageType {
        match self {
            PageBody::ColumnFixedLeaf(_) => PageType::ColumnFixedLeaf,
            PageBody::ColumnInternal(_) => PageType::ColumnInternal,
            PageBody::ColumnVariableLeaf(_) => PageType::ColumnVariableLeaf,
            PageBody::RowInternal(_) => PageType::RowInternal,
            PageBody::RowLeaf(_) => PageType::RowLeaf,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalIndex> {
        match self {
            PageBody::ColumnInternal(idx) | PageBody::RowInternal(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn as_internal_mut(&mut self) -> Option<&mut InternalIndex> {
        match self {
            PageBody::ColumnInternal(idx) | PageBody::RowInternal(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn entry_count(&self) -> u32 {
        match self {
            PageBody::ColumnFixedLeaf(p) => p.entry_count,
            PageBody::ColumnInternal(idx) => idx.refs.len() as u32,
            PageBody::ColumnVariableLeaf(p) => p.entry_count,
            PageBody::RowInternal(idx) => idx.refs.len() as u32,
            PageBody::RowLeaf(p) => p.entry_count,
        }
    }
}

/// An opaque "where does the overflow/child data live" cookie, carried
/// around by `PageBody` variants that reference off-page storage (addr
/// cells decode into one of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrCookie(pub Address);
