//! The checkpointer collaborator: §1 lists checkpointing as out of scope,
//! but C4 names one specific interaction with it — opening a raw cursor
//! against a sealed chunk's *checkpoint* rather than its live handle, with a
//! `NotFound` fallback when no checkpoint exists yet. `SimpleCheckpointer`
//! is a registry-backed reference implementation so that fallback path has
//! something real to exercise.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::btree::page_id::ChunkId;
use crate::collab::child_cursor::{ChildCursor, MemChunkStore};
use crate::error::{Error, Result};

pub trait Checkpointer: Send + Sync {
    /// Opens a cursor against `chunk`'s last checkpoint. `NotFound` means no
    /// checkpoint has been taken yet; C4 falls back to the chunk's live
    /// handle and marks the chunk empty in that case.
    fn open_checkpoint(&self, chunk: ChunkId) -> Result<Box<dyn ChildCursor>>;
}

#[derive(Default)]
pub struct SimpleCheckpointer {
    snapshots: Mutex<HashMap<ChunkId, Arc<MemChunkStore>>>,
}

impl SimpleCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `store` as `chunk`'s checkpoint, the way a real checkpointer
    /// would after flushing the chunk's in-memory tree to disk.
    pub fn checkpoint(&self, chunk: ChunkId, store: Arc<MemChunkStore>) {
        self.snapshots.lock().unwrap().insert(chunk, store);
    }
}

impl Checkpointer for SimpleCheckpointer {
    fn open_checkpoint(&self, chunk: ChunkId) -> Result<Box<dyn ChildCursor>> {
        let snapshots = self.snapshots.lock().unwrap();
        match snapshots.get(&chunk) {
            Some(store) => Ok(Box::new(store.open_cursor())),
            None => Err(Error::not_found(format!("no checkpoint for chunk {}", chunk))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkpoint_reports_not_found() {
        let ckpt = SimpleCheckpointer::new();
        let err = ckpt.open_checkpoint(7).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn taken_checkpoint_opens_a_cursor() {
        let ckpt = SimpleCheckpointer::new();
        let store = MemChunkStore::new();
        ckpt.checkpoint(3, Arc::clone(&store));
        assert!(ckpt.open_checkpoint(3).is_ok());
    }
}
