//! The cell codec collaborator: §6 names this as an out-of-scope interface
//! ("unpack(cell) -> {type,...}", "cell_rle(unpack) -> u64"). Physical cell
//! packing/compression is not this crate's concern; `SimpleCellCodec` below
//! is a minimal, uncompressed reference encoding that exists only so
//! `btree::alloc` has a real disk-image format to materialize from in tests.

use crate::btree::page::PageType;
use crate::error::{Error, Result};
use std::convert::TryInto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Key,
    KeyOvfl,
    Value,
    ValueOvfl,
    AddrInt,
    AddrLeaf,
    AddrLeafNo,
    AddrDel,
    /// a column-store value cell: carries its own run length.
    ColumnValue,
}

impl CellType {
    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => CellType::Key,
            1 => CellType::KeyOvfl,
            2 => CellType::Value,
            3 => CellType::ValueOvfl,
            4 => CellType::AddrInt,
            5 => CellType::AddrLeaf,
            6 => CellType::AddrLeafNo,
            7 => CellType::AddrDel,
            8 => CellType::ColumnValue,
            other => return Err(Error::fatal(format!("unknown cell tag {}", other))),
        })
    }

    fn tag(self) -> u8 {
        match self {
            CellType::Key => 0,
            CellType::KeyOvfl => 1,
            CellType::Value => 2,
            CellType::ValueOvfl => 3,
            CellType::AddrInt => 4,
            CellType::AddrLeaf => 5,
            CellType::AddrLeafNo => 6,
            CellType::AddrDel => 7,
            CellType::ColumnValue => 8,
        }
    }

    pub fn is_addr(self) -> bool {
        matches!(
            self,
            CellType::AddrInt | CellType::AddrLeaf | CellType::AddrLeafNo | CellType::AddrDel
        )
    }

    pub fn is_overflow(self) -> bool {
        matches!(self, CellType::KeyOvfl | CellType::ValueOvfl)
    }
}

#[derive(Debug, Clone)]
pub struct Unpacked {
    pub cell_type: CellType,
    /// key/value bytes, or (for addr cells) the 12-byte encoded `Address`.
    pub data: Vec<u8>,
    pub rle: u64,
    /// column-store record number this cell starts at (0 for row-store).
    pub recno: u64,
}

/// run length of an unpacked cell; every cell repeats at least once.
pub fn cell_rle(u: &Unpacked) -> u64 {
    u.rle.max(1)
}

#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub entries: u32,
    pub recno: u64,
    pub empty_v_all: bool,
    pub empty_v_none: bool,
}

pub trait CellCodec: Send + Sync {
    fn parse_header(&self, image: &[u8]) -> Result<PageHeader>;
    fn header_len(&self) -> usize;
    /// decode the cell starting at `offset`, returning it plus the number of
    /// bytes consumed so the caller can advance to the next cell.
    fn cell_at(&self, image: &[u8], offset: usize) -> Result<(Unpacked, usize)>;
    fn cell_rle(&self, u: &Unpacked) -> u64 {
        cell_rle(u)
    }
}

fn page_type_tag(t: PageType) -> u8 {
    match t {
        PageType::ColumnFixedLeaf => 0,
        PageType::ColumnInternal => 1,
        PageType::ColumnVariableLeaf => 2,
        PageType::RowInternal => 3,
        PageType::RowLeaf => 4,
    }
}

fn page_type_from_tag(tag: u8) -> Result<PageType> {
    Ok(match tag {
        0 => PageType::ColumnFixedLeaf,
        1 => PageType::ColumnInternal,
        2 => PageType::ColumnVariableLeaf,
        3 => PageType::RowInternal,
        4 => PageType::RowLeaf,
        other => return Err(Error::fatal(format!("unknown page type tag {}", other))),
    })
}

const HEADER_LEN: usize = 24;
const EMPTY_V_ALL: u8 = 0b01;
const EMPTY_V_NONE: u8 = 0b10;

/// An uncompressed reference cell codec: fixed 24-byte header, followed by
/// `entries` variable-length cells, each starting with a 1-byte type tag.
pub struct SimpleCellCodec;

impl CellCodec for SimpleCellCodec {
    fn parse_header(&self, image: &[u8]) -> Result<PageHeader> {
        if image.len() < HEADER_LEN {
            return Err(Error::fatal("page image shorter than header"));
        }
        let page_type = page_type_from_tag(image[0])?;
        let flags = image[1];
        let entries = u32::from_le_bytes(image[4..8].try_into().unwrap());
        let recno = u64::from_le_bytes(image[8..16].try_into().unwrap());
        Ok(PageHeader {
            page_type,
            entries,
            recno,
            empty_v_all: flags & EMPTY_V_ALL != 0,
            empty_v_none: flags & EMPTY_V_NONE != 0,
        })
    }

    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn cell_at(&self, image: &[u8], offset: usize) -> Result<(Unpacked, usize)> {
        if offset >= image.len() {
            return Err(Error::fatal("cell offset past end of image"));
        }
        let cell_type = CellType::from_tag(image[offset])?;
        let mut pos = offset + 1;
        let (data, rle, recno) = match cell_type {
            CellType::Key | CellType::KeyOvfl | CellType::Value | CellType::ValueOvfl => {
                let len = read_u32(image, pos)?;
                pos += 4;
                let data = image
                    .get(pos..pos + len as usize)
                    .ok_or_else(|| Error::fatal("truncated cell payload"))?
                    .to_vec();
                pos += len as usize;
                (data, 1u64, 0u64)
            }
            CellType::AddrInt | CellType::AddrLeaf | CellType::AddrLeafNo | CellType::AddrDel => {
                let chunk = read_u32(image, pos)?;
                pos += 4;
                let addr_off = read_u64(image, pos)?;
                pos += 8;
                let mut data = Vec::with_capacity(12);
                data.extend_from_slice(&chunk.to_le_bytes());
                data.extend_from_slice(&addr_off.to_le_bytes());
                (data, 1u64, 0u64)
            }
            CellType::ColumnValue => {
                let recno = read_u64(image, pos)?;
                pos += 8;
                let rle = read_u64(image, pos)?;
                pos += 8;
                let len = read_u32(image, pos)?;
                pos += 4;
                let data = image
                    .get(pos..pos + len as usize)
                    .ok_or_else(|| Error::fatal("truncated column cell payload"))?
                    .to_vec();
                pos += len as usize;
                (data, rle, recno)
            }
        };
        Ok((
            Unpacked {
                cell_type,
                data,
                rle,
                recno,
            },
            pos - offset,
        ))
    }
}

fn read_u32(image: &[u8], pos: usize) -> Result<u32> {
    let bytes = image
        .get(pos..pos + 4)
        .ok_or_else(|| Error::fatal("truncated u32 in cell stream"))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u64(image: &[u8], pos: usize) -> Result<u64> {
    let bytes = image
        .get(pos..pos + 8)
        .ok_or_else(|| Error::fatal("truncated u64 in cell stream"))?;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

/// Builds raw page images in `SimpleCellCodec`'s wire format; used by tests
/// (and by `InMemoryBlockManager` fixtures) in place of a real block layer.
pub struct DiskPageBuilder {
    page_type: PageType,
    recno: u64,
    cells: Vec<u8>,
    entries: u32,
}

impl DiskPageBuilder {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            recno: 0,
            cells: Vec::new(),
            entries: 0,
        }
    }

    pub fn with_recno(mut self, recno: u64) -> Self {
        self.recno = recno;
        self
    }

    pub fn key_cell(mut self, key: &[u8]) -> Self {
        self.push_bytes_cell(CellType::Key, key);
        self
    }

    pub fn value_cell(mut self, value: &[u8]) -> Self {
        self.push_bytes_cell(CellType::Value, value);
        self
    }

    pub fn addr_cell(mut self, cell_type: CellType, chunk: u32, offset: u64) -> Self {
        debug_assert!(cell_type.is_addr());
        self.cells.push(cell_type.tag());
        self.cells.extend_from_slice(&chunk.to_le_bytes());
        self.cells.extend_from_slice(&offset.to_le_bytes());
        self.entries += 1;
        self
    }

    pub fn column_value_cell(mut self, recno: u64, rle: u64, value: &[u8]) -> Self {
        self.cells.push(CellType::ColumnValue.tag());
        self.cells.extend_from_slice(&recno.to_le_bytes());
        self.cells.extend_from_slice(&rle.to_le_bytes());
        self.cells.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.cells.extend_from_slice(value);
        self.entries += 1;
        self
    }

    fn push_bytes_cell(&mut self, cell_type: CellType, bytes: &[u8]) {
        self.cells.push(cell_type.tag());
        self.cells.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.cells.extend_from_slice(bytes);
        self.entries += 1;
    }

    pub fn build(self) -> Vec<u8> {
        let mut image = Vec::with_capacity(HEADER_LEN + self.cells.len());
        image.push(page_type_tag(self.page_type));
        image.push(0); // flags
        image.push(0);
        image.push(0);
        image.extend_from_slice(&self.entries.to_le_bytes());
        image.extend_from_slice(&self.recno.to_le_bytes());
        image.extend_from_slice(&0u64.to_le_bytes()); // reserved
        image.extend_from_slice(&self.cells);
        image
    }
}

/// Iterates the cells of a page image in order, the way `alloc::materialize`
/// walks a freshly read disk image.
pub struct CellIter<'a> {
    codec: &'a dyn CellCodec,
    image: &'a [u8],
    offset: usize,
    remaining: u32,
}

impl<'a> CellIter<'a> {
    pub fn new(codec: &'a dyn CellCodec, image: &'a [u8], header: &PageHeader) -> Self {
        Self {
            codec,
            image,
            offset: codec.header_len(),
            remaining: header.entries,
        }
    }
}

impl<'a> Iterator for CellIter<'a> {
    type Item = Result<(usize, Unpacked)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let start = self.offset;
        match self.codec.cell_at(self.image, self.offset) {
            Ok((unpacked, len)) => {
                self.offset += len;
                self.remaining -= 1;
                Some(Ok((start, unpacked)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
