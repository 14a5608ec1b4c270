//! Crash recovery on reopen and pool validation.
//!
//! A crash is simulated by leaking a live transaction guard on a worker
//! thread: its journal records stay behind exactly as if the process had
//! died before commit.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use std::mem;
use std::sync::Arc;
use std::thread;

/// Run `f` inside a transaction that never ends.
fn crash_during<F>(pool: &Arc<Pool>, f: F)
where
    F: FnOnce(&Transaction<'_>) -> Result<()> + Send + 'static,
{
    let pool = Arc::clone(pool);
    thread::spawn(move || {
        let tx = pool.begin().unwrap();
        f(&tx).unwrap();
        mem::forget(tx);
    })
    .join()
    .unwrap();
}

#[test]
fn uncommitted_writes_are_rolled_back_on_reopen() {
    let tp = TestPool::new();
    let root = tp.root::<PairRoot>().unwrap();
    tp.transaction(|tx| tx.write(root, PairRoot { a: 1, b: 2 }))
        .unwrap();

    crash_during(&tp.pool, move |tx| {
        tx.write(root.field(|r| &r.a), 100u64)?;
        tx.write(root.field(|r| &r.b), 200u64)
    });
    // visible before the "restart"
    assert_eq!(tp.read(root).unwrap(), PairRoot { a: 100, b: 200 });

    let tp = tp.reopen();
    let stats = *tp.recovery_stats();
    assert_eq!(stats.rolled_back, 1);
    assert!(stats.ranges_restored >= 1);
    assert!(!stats.is_clean());
    let root = tp.root::<PairRoot>().unwrap();
    assert_eq!(tp.read(root).unwrap(), PairRoot { a: 1, b: 2 });
}

#[test]
fn uncommitted_allocation_is_released() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    let before = tp.stats().objects;

    crash_during(&tp.pool, move |tx| {
        let node = tx.alloc(Node {
            value: 7,
            next: PersistentPtr::null(),
        })?;
        tx.write(root.field(|r| &r.head), node)?;
        tx.write(root.field(|r| &r.len), 1u64)
    });
    assert_eq!(tp.stats().objects, before + 1);

    let tp = tp.reopen();
    assert_eq!(tp.recovery_stats().allocations_released, 1);
    assert_eq!(tp.stats().objects, before);
    assert_eq!(tp.iter::<Node>().count(), 0);
    let root = tp.root::<ListRoot>().unwrap();
    let list = tp.read(root).unwrap();
    assert!(list.head.is_null());
    assert_eq!(list.len, 0);
}

#[test]
fn uncommitted_free_leaves_object_live() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    tp.transaction(|tx| {
        let node = tx.alloc(Node {
            value: 3,
            next: PersistentPtr::null(),
        })?;
        tx.write(root.field(|r| &r.head), node)
    })
    .unwrap();

    crash_during(&tp.pool, move |tx| {
        tx.free_stored(root.field(|r| &r.head))
    });

    let tp = tp.reopen();
    assert_eq!(tp.recovery_stats().frees_applied, 0);
    let root = tp.root::<ListRoot>().unwrap();
    let head = tp.read(root).unwrap().head;
    assert!(!head.is_null());
    assert_eq!(list_values(&tp, head), [3]);
    assert_eq!(tp.iter::<Node>().count(), 1);
}

#[test]
fn committed_work_survives_later_crash() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    for value in 1..=3u64 {
        tp.transaction(|tx| {
            let list = tp.read(root)?;
            let node = tx.alloc(Node {
                value,
                next: list.head,
            })?;
            tx.write(root.field(|r| &r.head), node)?;
            tx.write(root.field(|r| &r.len), list.len + 1)
        })
        .unwrap();
    }

    crash_during(&tp.pool, move |tx| {
        let pool = tx.pool();
        let list = pool.read(root)?;
        let node = tx.alloc(Node {
            value: 4,
            next: list.head,
        })?;
        tx.write(root.field(|r| &r.head), node)?;
        tx.write(root.field(|r| &r.len), list.len + 1)
    });

    let tp = tp.reopen();
    let root = tp.root::<ListRoot>().unwrap();
    let list = tp.read(root).unwrap();
    assert_eq!(list.len, 3);
    assert_eq!(list_values(&tp, list.head), [3, 2, 1]);

    // a second clean restart has nothing left to recover
    let tp = tp.reopen();
    assert!(tp.recovery_stats().is_clean());
}

/// Free a fresh node on its own thread, then let a second thread commit a
/// node into the released block. Returns the reused pointer.
fn free_then_reuse(tp: &TestPool, root: PersistentPtr<ListRoot>) -> PersistentPtr<Node> {
    let victim = tp
        .alloc_atomic(Node {
            value: 1,
            next: PersistentPtr::null(),
        })
        .unwrap();
    let pool = Arc::clone(&tp.pool);
    thread::spawn(move || {
        let mut victim = victim;
        pool.transaction(|tx| tx.free(&mut victim))
    })
    .join()
    .unwrap()
    .unwrap();

    let pool = Arc::clone(&tp.pool);
    let reused = thread::spawn(move || {
        pool.transaction(|tx| {
            let node = tx.alloc(Node {
                value: 2,
                next: PersistentPtr::null(),
            })?;
            tx.write(root.field(|r| &r.head), node)?;
            tx.write(root.field(|r| &r.len), 1u64)?;
            Ok(node)
        })
    })
    .join()
    .unwrap()
    .unwrap();
    assert_eq!(reused.offset(), victim.offset());
    reused
}

#[test]
fn reused_block_survives_recovery() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    let reused = free_then_reuse(&tp, root);

    crash_during(&tp.pool, move |tx| tx.write(root.field(|r| &r.len), 7u64));

    let tp = tp.reopen();
    let stats = *tp.recovery_stats();
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(stats.rolled_forward, 0);
    assert_eq!(stats.frees_applied, 0);
    let root = tp.root::<ListRoot>().unwrap();
    let list = tp.read(root).unwrap();
    assert_eq!(list.len, 1);
    assert_eq!(list.head.offset(), reused.offset());
    assert_eq!(list_values(&tp, list.head), [2]);
    assert_eq!(tp.iter::<Node>().count(), 1);
}

#[test]
fn crashed_free_of_reused_block_keeps_it_live() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    let reused = free_then_reuse(&tp, root);

    crash_during(&tp.pool, move |tx| {
        let mut node = reused;
        tx.free(&mut node)?;
        tx.write(root.field(|r| &r.head), node)
    });

    let tp = tp.reopen();
    assert_eq!(tp.recovery_stats().frees_applied, 0);
    let root = tp.root::<ListRoot>().unwrap();
    let list = tp.read(root).unwrap();
    assert_eq!(list_values(&tp, list.head), [2]);
    assert_eq!(tp.iter::<Node>().count(), 1);
}

#[test]
fn check_and_exists_validate_layout() {
    let tp = TestPool::new();
    tp.root::<PairRoot>().unwrap();
    let path = tp.path().to_path_buf();
    let layout = tp.layout.clone();

    assert!(Pool::check(&path, &layout).unwrap());
    assert!(!Pool::check(&path, "some-other-layout").unwrap());
    assert!(Pool::exists(&path, &layout));
    assert!(!Pool::exists(tp.dir.path().join("missing.pool"), &layout));

    let junk = tp.dir.path().join("junk.pool");
    std::fs::write(&junk, vec![0xa5u8; 64 * 1024]).unwrap();
    assert!(!Pool::check(&junk, &layout).unwrap());
}

#[test]
fn open_with_wrong_layout_is_refused() {
    let tp = TestPool::new();
    let path = tp.path().to_path_buf();
    let layout = tp.layout.clone();
    let dir = tp.dir;
    drop(tp.pool);

    assert!(matches!(
        Pool::open(&path, "not-the-layout"),
        Err(Error::Pool(_))
    ));
    assert!(matches!(
        Pool::open(dir.path().join("absent.pool"), &layout),
        Err(Error::Pool(_))
    ));

    let pool = Pool::open(&path, &layout).unwrap();
    assert_eq!(pool.layout(), layout);
}

#[test]
fn reopening_live_path_returns_same_instance() {
    let tp = TestPool::new();
    let again = Pool::open(tp.path(), &tp.layout).unwrap();
    assert!(Arc::ptr_eq(&again, &tp.pool));
}

#[test]
fn create_over_existing_file_fails() {
    let tp = TestPool::new();
    let err = Pool::create(tp.path(), &tp.layout, 0).unwrap_err();
    assert!(matches!(err, Error::Pool(_) | Error::Io(_)));
}
