//! An embedded ordered key-value engine split into two halves: a paged
//! B-tree substrate with hazard-pointer page residency control (PMRC,
//! `btree`) and an LSM-tree overlay giving it a merged, transactionally
//! consistent cursor across an arbitrary number of component chunks (LMC,
//! `lsm`). `collab` holds the interfaces the two halves consume but do not
//! own — block storage, transaction visibility, Bloom filters, cell
//! encoding — each with a minimal reference implementation so this crate's
//! own tests exercise real behavior end to end.

pub mod btree;
pub mod cache;
pub mod collab;
pub mod error;
pub mod log;
pub mod lsm;
pub mod types;
pub mod utils;

pub use error::{Error, ErrorKind, Result, VoidResult};
