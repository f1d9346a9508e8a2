//! Integration counterpart to `small-db`'s `tests/integretions/tx_isolation_test.rs`:
//! drive the conflict-checking insert hook C4 installs on non-primary chunks
//! through the real `LsmWriter` path, instead of exercising
//! `ConflictCheckingCursor` directly the way the unit test in
//! `collab/child_cursor.rs` does.

mod common;

use ridge_kv::error::ErrorKind;

#[test]
fn older_snapshot_writer_conflicts_with_a_newer_committed_write() {
    common::setup();
    let engine = common::new_engine(1 << 20);
    let writer = engine.writer();

    // a long-lived reader keeps the seal below from being "visible to all",
    // so the next write's admission window has to cover both chunks.
    let t_reader = engine.txm.begin();
    let t_old = engine.txm.begin();
    let t_write1 = engine.txm.begin();

    writer.insert(b"k", b"v1", t_write1, false, &engine.ckpt).unwrap();
    engine.tree.do_switch(t_write1);

    let err = writer
        .insert(b"k", b"v2", t_old, true, &engine.ckpt)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let _ = t_reader;
}

#[test]
fn newer_writer_freely_overwrites_an_older_committed_write() {
    common::setup();
    let engine = common::new_engine(1 << 20);
    let writer = engine.writer();

    let t_reader = engine.txm.begin();
    let t_write1 = engine.txm.begin();
    writer.insert(b"k", b"v1", t_write1, false, &engine.ckpt).unwrap();
    engine.tree.do_switch(t_write1);

    let t_write2 = engine.txm.begin();
    writer
        .insert(b"k", b"v2", t_write2, true, &engine.ckpt)
        .unwrap();

    let mut cur = engine.reader();
    assert!(cur.search(b"k").unwrap());
    assert_eq!(cur.value(), Some(b"v2".as_ref()));
    let _ = t_reader;
}
