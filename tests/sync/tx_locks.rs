//! Locks attached to transaction frames.

use super::*;
use nvobj::{WORD_EXCLUSIVE, WORD_UNLOCKED};
use std::sync::Arc;
use std::thread;

fn push_front(pool: &Pool, root: PersistentPtr<ListRoot>, value: u64) -> Result<()> {
    let lock = TxLock::Mutex(root.field(|r| &r.lock));
    pool.transaction_with(&[lock], |tx| {
        let current = pool.read(root)?;
        let node = tx.alloc(Node {
            value,
            next: current.head,
        })?;
        tx.write(root.field(|r| &r.head), node)?;
        tx.write(root.field(|r| &r.len), current.len + 1)
    })
}

#[test]
fn lock_held_for_frame_and_released_after_commit() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    let lock = root.field(|r| &r.lock);

    tp.transaction_with(&[TxLock::Mutex(lock)], |tx| {
        assert_eq!(tp.read(lock)?.state(), WORD_EXCLUSIVE);
        let elsewhere = thread::scope(|s| {
            s.spawn(|| tp.mutex(lock).and_then(|m| m.try_lock()))
                .join()
                .unwrap()
        });
        assert!(!elsewhere?);
        tx.write(root.field(|r| &r.len), 1u64)
    })
    .unwrap();

    // no explicit unlock anywhere
    assert_eq!(tp.read(lock).unwrap().state(), WORD_UNLOCKED);
    let m = tp.mutex(lock).unwrap();
    assert!(!m.is_locked());
    assert!(m.try_lock().unwrap());
    m.unlock().unwrap();
}

#[test]
fn abort_releases_attached_locks() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    let rw = root.field(|r| &r.rw);
    let mutex = root.field(|r| &r.mutex);

    let err = tp
        .transaction_with(&[TxLock::Mutex(mutex), TxLock::Write(rw)], |tx| {
            tx.write(root.field(|r| &r.value), 9u64)?;
            Err::<(), _>(tx.abort(2))
        })
        .unwrap_err();
    assert_eq!(err.abort_code(), Some(2));
    assert_eq!(tp.read(root).unwrap().value, 0);
    assert!(!tp.mutex(mutex).unwrap().is_locked());
    assert!(!tp.rwlock(rw).unwrap().is_locked());
    assert_eq!(tp.read(rw).unwrap().state(), WORD_UNLOCKED);
}

#[test]
fn nested_frame_releases_its_own_locks_first() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    let mutex = root.field(|r| &r.mutex);
    let rw = root.field(|r| &r.rw);

    tp.transaction_with(&[TxLock::Mutex(mutex)], |_| {
        tp.transaction_with(&[TxLock::Read(rw)], |_| {
            assert_eq!(tp.read(rw)?.state(), 1);
            Ok(())
        })?;
        assert!(!tp.rwlock(rw)?.is_locked());
        assert!(tp.mutex(mutex)?.is_locked());
        Ok(())
    })
    .unwrap();
    assert!(!tp.mutex(mutex).unwrap().is_locked());
}

#[test]
fn relocking_held_mutex_fails_begin() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    let mutex = root.field(|r| &r.mutex);

    tp.transaction_with(&[TxLock::Mutex(mutex)], |tx| {
        let inner = tp.begin_with(&[TxLock::Mutex(mutex)]);
        assert!(matches!(inner, Err(Error::Lock(_))));
        assert_eq!(tx.depth(), 1);
        tx.write(root.field(|r| &r.value), 4u64)
    })
    .unwrap();
    assert_eq!(tp.read(root).unwrap().value, 4);
    assert!(!tp.mutex(mutex).unwrap().is_locked());
}

#[test]
fn misaligned_lock_word_is_lock_error() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    // SAFETY: only the lock-word checks see this pointer.
    let skewed = unsafe { root.cast::<u8>().add(4).cast::<PMutex>() };
    assert!(matches!(tp.mutex(skewed), Err(Error::Lock(_))));
    assert!(matches!(
        tp.begin_with(&[TxLock::Mutex(skewed)]),
        Err(Error::Lock(_))
    ));
    assert_eq!(tp.stage(), TxStage::None);
}

#[test]
fn concurrent_pushes_serialize_on_list_lock() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    let pool = Arc::clone(&tp.pool);

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..25 {
                    push_front(&pool, root, t * 100 + i).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    drop(pool);

    let tp = tp.reopen();
    let root = tp.root::<ListRoot>().unwrap();
    let list = tp.read(root).unwrap();
    assert_eq!(list.len, 100);
    let mut values = list_values(&tp, list.head);
    assert_eq!(values.len(), 100);
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 100);
    assert_eq!(list.lock.state(), WORD_UNLOCKED);
}
