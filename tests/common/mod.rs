//! Shared integration-test scaffolding, in the shape of `small-db`'s
//! `tests/common/mod.rs` / `tests/test_utils/setup.rs`: one `setup()` that
//! wires up logging, plus constructors that build a fresh tree and its
//! collaborators so each test gets an isolated engine instance instead of
//! sharing global state (this crate has none to clear or reset).

use std::sync::{Arc, Once};

use ridge_kv::collab::checkpointer::SimpleCheckpointer;
use ridge_kv::collab::lsm_manager::{LsmManager, SimpleLsmManager};
use ridge_kv::collab::txn::{SimpleTransactionManager, TransactionManager};
use ridge_kv::lsm::chunk::LsmTree;
use ridge_kv::lsm::merge_cursor::MergeCursor;
use ridge_kv::lsm::write::LsmWriter;

static LOG_INIT: Once = Once::new();

/// Conduct the initialization: set up log configuration once per test
/// binary. `small-db`'s own `setup()` also clears a global buffer pool and
/// resets a global log manager; this crate carries no process-wide
/// singletons (every test builds its own `LsmTree`/`CacheAccountant`), so
/// logging is the only shared state left to arrange.
pub fn setup() {
    LOG_INIT.call_once(ridge_kv::log::init_log);
}

pub struct Engine {
    pub tree: Arc<LsmTree>,
    pub txm: Arc<dyn TransactionManager>,
    pub ckpt: SimpleCheckpointer,
    pub lsm_manager: Arc<SimpleLsmManager>,
}

impl Engine {
    pub fn writer(&self) -> LsmWriter {
        LsmWriter::new(Arc::clone(&self.tree), Arc::clone(&self.txm))
            .with_lsm_manager(Arc::clone(&self.lsm_manager) as Arc<dyn LsmManager>)
    }

    pub fn reader(&self) -> MergeCursor {
        let mut cur = MergeCursor::new();
        cur.open(
            &self.tree,
            ridge_kv::lsm::cursor_lifecycle::OpenMode::ReadOnly,
            &self.txm,
            &self.ckpt,
        )
        .unwrap();
        cur
    }
}

/// Builds a fresh engine with a given chunk size, one empty primary chunk
/// already open (so writes never have to spin through write-admission's
/// zero-chunk path unless a test wants exactly that).
pub fn new_engine(chunk_size: u64) -> Engine {
    let tree = Arc::new(LsmTree::new(chunk_size));
    tree.append_new_primary();
    let txm: Arc<dyn TransactionManager> = Arc::new(SimpleTransactionManager::new());
    let lsm_manager = SimpleLsmManager::new(Arc::clone(&txm));
    Engine {
        tree,
        txm,
        ckpt: SimpleCheckpointer::new(),
        lsm_manager,
    }
}
