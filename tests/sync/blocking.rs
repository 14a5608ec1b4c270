//! Explicit lock handles across threads and runs.

use super::*;
use nvobj::{WORD_EXCLUSIVE, WORD_UNLOCKED};
use parking_lot::Mutex;
use std::thread;
use std::time::Duration;

#[test]
fn readers_share_writer_excludes() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    let slot = root.field(|r| &r.rw);
    let events = Mutex::new(Vec::new());

    let rw = tp.rwlock(slot).unwrap();
    rw.read().unwrap();
    thread::scope(|s| {
        s.spawn(|| {
            let rw = tp.rwlock(slot).unwrap();
            let _g = rw.shared_guard().unwrap();
            assert_eq!(tp.read(slot).unwrap().state(), 2);
            events.lock().push("second reader");
        })
        .join()
        .unwrap();

        let writer = s.spawn(|| {
            let rw = tp.rwlock(slot).unwrap();
            assert!(!rw.try_write().unwrap());
            let _g = rw.guard().unwrap();
            events.lock().push("writer");
        });
        thread::sleep(Duration::from_millis(20));
        events.lock().push("first reader done");
        rw.unlock().unwrap();
        writer.join().unwrap();
    });

    assert_eq!(
        *events.lock(),
        ["second reader", "first reader done", "writer"]
    );
    assert_eq!(tp.read(slot).unwrap().state(), WORD_UNLOCKED);
}

#[test]
fn condvar_wakes_waiter_after_state_change() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    let mutex = root.field(|r| &r.mutex);
    let cond = root.field(|r| &r.cond);
    let ready = root.field(|r| &r.ready);

    thread::scope(|s| {
        let waiter = s.spawn(|| -> Result<u64> {
            let m = tp.mutex(mutex)?;
            let cv = tp.condvar(cond)?;
            m.lock()?;
            while tp.read(ready)? == 0 {
                cv.wait(&m)?;
            }
            let value = tp.read(root.field(|r| &r.value))?;
            m.unlock()?;
            Ok(value)
        });

        let m = tp.mutex(mutex).unwrap();
        let cv = tp.condvar(cond).unwrap();
        {
            let _g = m.guard().unwrap();
            tp.transaction(|tx| {
                tx.write(root.field(|r| &r.value), 42u64)?;
                tx.write(ready, 1u64)
            })
            .unwrap();
        }
        cv.notify_all();
        assert_eq!(waiter.join().unwrap().unwrap(), 42);
    });
    assert!(!tp.mutex(mutex).unwrap().is_locked());
}

#[test]
fn lock_misuse_is_reported() {
    let tp = TestPool::cache();
    let root = tp.root::<Shared>().unwrap();
    let m = tp.mutex(root.field(|r| &r.mutex)).unwrap();
    let rw = tp.rwlock(root.field(|r| &r.rw)).unwrap();
    let cv = tp.condvar(root.field(|r| &r.cond)).unwrap();

    assert!(matches!(m.unlock(), Err(Error::Lock(_))));
    assert!(matches!(rw.unlock(), Err(Error::Lock(_))));
    assert!(matches!(cv.wait(&m), Err(Error::Lock(_))));

    m.lock().unwrap();
    let foreign = thread::scope(|s| {
        s.spawn(|| tp.mutex(root.field(|r| &r.mutex)).unwrap().unlock())
            .join()
            .unwrap()
    });
    assert!(matches!(foreign, Err(Error::Lock(_))));
    m.unlock().unwrap();
}

#[test]
fn null_lock_pointer_is_rejected() {
    let tp = TestPool::cache();
    assert!(matches!(
        tp.mutex(PersistentPtr::null()),
        Err(Error::NullDereference(_))
    ));
}

#[test]
fn lock_abandoned_by_previous_run_is_reset() {
    let tp = TestPool::new();
    let root = tp.root::<Shared>().unwrap();
    let slot = root.field(|r| &r.mutex);
    let first_run = tp.run_id();
    {
        let m = tp.mutex(slot).unwrap();
        m.lock().unwrap();
        // the process "dies" holding the lock
    }
    assert_eq!(tp.read(slot).unwrap().state(), WORD_EXCLUSIVE);

    let tp = tp.reopen();
    assert_ne!(tp.run_id(), first_run);
    let root = tp.root::<Shared>().unwrap();
    let slot = root.field(|r| &r.mutex);

    let stale = tp.read(slot).unwrap();
    assert_eq!(stale.run_id(), first_run);
    assert_eq!(stale.state(), WORD_EXCLUSIVE);

    let m = tp.mutex(slot).unwrap();
    assert!(!m.is_locked());
    let fresh = tp.read(slot).unwrap();
    assert_eq!(fresh.run_id(), tp.run_id());
    assert_eq!(fresh.state(), WORD_UNLOCKED);
    assert!(m.try_lock().unwrap());
    m.unlock().unwrap();
}
