//! Typed iteration over live allocations.

use crate::common::*;

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
struct Tag {
    id: u64,
}

impl Persistent for Tag {}

#[test]
fn iteration_sees_committed_objects_in_allocation_order() {
    let tp = TestPool::new();
    tp.root::<ListRoot>().unwrap();
    tp.transaction(|tx| {
        for id in 0..5 {
            tx.alloc(Tag { id })?;
            tx.alloc(Node::default())?;
        }
        Ok(())
    })
    .unwrap();
    let _ = tp.transaction(|tx| {
        tx.alloc(Tag { id: 99 })?;
        Err::<(), _>(tx.abort(-1))
    });

    let tp = tp.reopen();
    let ids: Vec<u64> = tp.iter::<Tag>().map(|p| tp.read(p).unwrap().id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(tp.iter::<Node>().count(), 5);
    assert_eq!(tp.iter::<ListRoot>().count(), 0);
}

#[test]
fn exhausted_iterator_is_out_of_range() {
    let tp = TestPool::cache();
    tp.alloc_atomic(Tag { id: 1 }).unwrap();
    let mut it = tp.iter::<Tag>();
    assert!(!it.is_end());
    assert_eq!(tp.read(it.current().unwrap()).unwrap().id, 1);
    it.advance().unwrap();
    assert!(it.is_end());
    assert!(matches!(it.current(), Err(Error::OutOfRange(_))));
    assert!(matches!(it.advance(), Err(Error::OutOfRange(_))));
    it.restart();
    assert!(!it.is_end());
}

#[test]
fn freeing_during_iteration_skips_freed_objects() {
    let tp = TestPool::cache();
    let tags: Vec<_> = (0..4).map(|id| tp.alloc_atomic(Tag { id }).unwrap()).collect();
    let mut it = tp.iter::<Tag>();
    assert_eq!(it.current().unwrap(), tags[0]);
    tp.transaction(|tx| {
        let mut victim = tags[1];
        tx.free(&mut victim)
    })
    .unwrap();
    it.advance().unwrap();
    assert_eq!(it.current().unwrap(), tags[2]);
}
