//! §6 collaborators: interfaces PMRC and LMC consume but do not own. Each
//! submodule carries a trait (the actual interface, binding) plus a minimal
//! reference implementation so the crate's own tests can drive real
//! behavior end to end; the reference implementations are themselves
//! outside the spec's scope, the way a unit test's fake dependency is never
//! the thing under test.

pub mod block_manager;
pub mod bloom;
pub mod cell_codec;
pub mod checkpointer;
pub mod child_cursor;
pub mod lsm_manager;
pub mod txn;
