//! Commit/abort end-to-end scenarios.

use crate::common::*;

#[test]
fn commit_makes_writes_visible_and_durable() {
    let tp = TestPool::new();
    let root = tp.root::<PairRoot>().unwrap();
    tp.transaction(|tx| {
        tx.write(root.field(|r| &r.a), 5u64)?;
        tx.write(root.field(|r| &r.b), 10u64)
    })
    .unwrap();
    assert_eq!(tp.read(root).unwrap(), PairRoot { a: 5, b: 10 });

    let tp = tp.reopen();
    assert!(tp.recovery_stats().is_clean());
    let root = tp.root::<PairRoot>().unwrap();
    assert_eq!(tp.read(root).unwrap(), PairRoot { a: 5, b: 10 });
}

#[test]
fn abort_restores_prior_value_and_reports_code() {
    let tp = TestPool::new();
    let root = tp.root::<PairRoot>().unwrap();
    tp.transaction(|tx| tx.write(root.field(|r| &r.a), 5u64))
        .unwrap();

    let err = tp
        .transaction(|tx| {
            tx.write(root.field(|r| &r.a), 10u64)?;
            assert_eq!(tp.read(root)?.a, 10);
            Err::<(), _>(tx.abort(-1))
        })
        .unwrap_err();
    assert!(matches!(err, Error::TransactionAborted { code: -1 }));
    assert_eq!(tp.read(root).unwrap().a, 5);

    let tp = tp.reopen();
    let root = tp.root::<PairRoot>().unwrap();
    assert_eq!(tp.read(root).unwrap().a, 5);
}

#[test]
fn closure_error_rolls_back_and_is_returned_unchanged() {
    let tp = TestPool::cache();
    let root = tp.root::<PairRoot>().unwrap();
    let err = tp
        .transaction(|tx| {
            tx.update(root, |r| {
                r.a = 1;
                r.b = 2;
            })?;
            Err::<(), _>(Error::Lock("caller gave up".into()))
        })
        .unwrap_err();
    match err {
        Error::Lock(msg) => assert_eq!(msg, "caller gave up"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tp.read(root).unwrap(), PairRoot::default());
}

#[test]
fn stage_tracks_transaction_lifecycle() {
    let tp = TestPool::cache();
    let root = tp.root::<PairRoot>().unwrap();
    assert_eq!(tp.stage(), TxStage::None);
    let _ = tp.transaction(|tx| {
        assert_eq!(tp.stage(), TxStage::Work);
        tx.add(root)?;
        let err = tx.abort(3);
        assert_eq!(tp.stage(), TxStage::OnAbort);
        Err::<(), _>(err)
    });
    assert_eq!(tp.stage(), TxStage::None);
}

#[test]
fn undo_registration_outside_transaction_is_scope_error() {
    let tp = TestPool::cache();
    assert!(matches!(Transaction::current(&tp), Err(Error::Scope(_))));
}

#[test]
fn unlogged_direct_write_survives_abort() {
    let tp = TestPool::cache();
    let root = tp.root::<PairRoot>().unwrap();
    tp.write_persist(root, &PairRoot { a: 1, b: 1 }).unwrap();

    let _ = tp.transaction(|tx| {
        tx.add(root.field(|r| &r.a))?;
        let raw = tp.direct(root)?;
        // SAFETY: the address is valid for the lifetime of the mapping and
        // no other reference to the root exists.
        unsafe {
            (*raw.as_ptr()).a = 2;
            (*raw.as_ptr()).b = 2;
        }
        Err::<(), _>(tx.abort(-1))
    });

    let after = tp.read(root).unwrap();
    assert_eq!(after.a, 1, "registered field is restored");
    assert_eq!(after.b, 2, "unregistered field keeps the aborted write");
}

#[test]
fn repeated_registration_snapshots_first_value() {
    let tp = TestPool::cache();
    let root = tp.root::<PairRoot>().unwrap();
    tp.write_persist(root, &PairRoot { a: 7, b: 7 }).unwrap();
    let _ = tp.transaction(|tx| {
        tx.write(root.field(|r| &r.a), 8u64)?;
        tx.write(root.field(|r| &r.a), 9u64)?;
        tx.write(root, PairRoot { a: 10, b: 10 })?;
        Err::<(), _>(tx.abort(-1))
    });
    assert_eq!(tp.read(root).unwrap(), PairRoot { a: 7, b: 7 });
}

#[test]
fn pool_stays_usable_after_engine_failure() {
    let tp = TestPool::cache();
    let root = tp.root::<PairRoot>().unwrap();
    let err = tp
        .transaction(|tx| {
            tx.write(root.field(|r| &r.a), 1u64)?;
            tx.alloc_array::<u64>(1 << 24)
        })
        .unwrap_err();
    assert!(matches!(err, Error::Allocation(_)));
    assert_eq!(tp.read(root).unwrap().a, 0);

    tp.transaction(|tx| tx.write(root.field(|r| &r.a), 2u64))
        .unwrap();
    assert_eq!(tp.read(root).unwrap().a, 2);
}
