//! Single-object allocation, free and pointer resolution.

use crate::common::*;
use nvobj::PString;
use std::sync::Arc;

fn push_front(tx: &Transaction<'_>, root: PersistentPtr<ListRoot>, value: u64) -> Result<()> {
    let head = tx.pool().read(root)?.head;
    let node = tx.alloc(Node { value, next: head })?;
    tx.write(root.field(|r| &r.head), node)?;
    tx.update(root.field(|r| &r.len), |len| *len += 1)?;
    Ok(())
}

#[test]
fn list_built_in_transactions_survives_reopen() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    for v in 1..=3 {
        tp.transaction(|tx| push_front(tx, root, v)).unwrap();
    }
    assert_eq!(list_values(&tp, tp.read(root).unwrap().head), vec![3, 2, 1]);

    let tp = tp.reopen();
    let root = tp.root::<ListRoot>().unwrap();
    let stored = tp.read(root).unwrap();
    assert_eq!(stored.len, 3);
    assert_eq!(list_values(&tp, stored.head), vec![3, 2, 1]);
    assert_eq!(tp.stats().objects, 4);
}

#[test]
fn aborted_alloc_leaves_no_object() {
    let tp = TestPool::new();
    let root = tp.root::<ListRoot>().unwrap();
    tp.transaction(|tx| push_front(tx, root, 1)).unwrap();
    let before = tp.stats();

    let err = tp
        .transaction(|tx| {
            push_front(tx, root, 2)?;
            push_front(tx, root, 3)?;
            Err::<(), _>(tx.abort(-1))
        })
        .unwrap_err();
    assert!(err.is_abort());
    assert_eq!(tp.stats(), before);
    assert_eq!(list_values(&tp, tp.read(root).unwrap().head), vec![1]);
}

#[test]
fn aborted_free_restores_object_and_link() {
    let tp = TestPool::cache();
    let root = tp.root::<ListRoot>().unwrap();
    tp.transaction(|tx| push_front(tx, root, 5)).unwrap();
    let head = tp.read(root).unwrap().head;

    let _ = tp.transaction(|tx| {
        tx.free_stored(root.field(|r| &r.head))?;
        Err::<(), _>(tx.abort(-1))
    });
    assert_eq!(tp.read(root).unwrap().head, head);
    assert_eq!(tp.read(head).unwrap().value, 5);
}

#[test]
fn free_of_non_allocation_is_rejected() {
    let tp = TestPool::cache();
    let node = tp.alloc_atomic(Node::default()).unwrap();
    let err = tp
        .transaction(|tx| {
            let mut inside = unsafe { node.field(|n| &n.next).cast::<Node>() };
            tx.free(&mut inside)
        })
        .unwrap_err();
    assert!(matches!(err, Error::Allocation(_)));
    tp.transaction(|tx| {
        let mut null = PersistentPtr::<Node>::null();
        tx.free(&mut null)
    })
    .unwrap();
}

#[test]
fn free_through_wrong_type_is_rejected() {
    let tp = TestPool::cache();
    let node = tp.alloc_atomic(Node { value: 4, next: PersistentPtr::null() }).unwrap();
    // SAFETY: the pointer is only handed to free, which must refuse it.
    let mut as_pair = unsafe { node.cast::<PairRoot>() };
    let err = tp.transaction(|tx| tx.free(&mut as_pair)).unwrap_err();
    assert!(matches!(err, Error::Type(_)));
    assert!(matches!(tp.free_atomic(&mut as_pair), Err(Error::Type(_))));
    assert!(!as_pair.is_null());
    assert_eq!(tp.read(node).unwrap().value, 4);
    assert_eq!(tp.stats().objects, 1);
}

#[test]
fn atomic_alloc_is_visible_without_transaction() {
    let tp = TestPool::new();
    let mut node = tp
        .alloc_atomic_with(|| Ok(Node { value: 9, next: PersistentPtr::null() }))
        .unwrap();
    let off = node.offset();
    let tp = tp.reopen();
    node = PersistentPtr::new(tp.id(), off);
    assert_eq!(tp.read(node).unwrap().value, 9);
    tp.free_atomic(&mut node).unwrap();
    assert!(node.is_null());
    assert_eq!(tp.stats().objects, 0);
}

#[test]
fn pointers_resolve_through_registry() {
    let tp = TestPool::cache();
    let node = tp.alloc_atomic(Node { value: 4, next: PersistentPtr::null() }).unwrap();
    assert_eq!(node.load().unwrap().value, 4);
    assert!(Arc::ptr_eq(&node.pool().unwrap(), &tp.pool));
    let raw = node.resolve().unwrap();
    // SAFETY: the node is live and not mutated concurrently.
    assert_eq!(unsafe { raw.as_ref() }.value, 4);

    let null = PersistentPtr::<Node>::null();
    assert!(matches!(null.load(), Err(Error::NullDereference(_))));
    assert!(matches!(tp.read(null), Err(Error::NullDereference(_))));
}

#[test]
fn strings_are_transactional() {
    let tp = TestPool::new();
    let root = tp.root::<PString>().unwrap();
    tp.transaction(|tx| PString::store(tx, root, "first")).unwrap();
    let _ = tp.transaction(|tx| {
        PString::store(tx, root, "second")?;
        Err::<(), _>(tx.abort(-1))
    });
    let tp = tp.reopen();
    let root = tp.root::<PString>().unwrap();
    assert_eq!(tp.read(root).unwrap().read(&tp).unwrap(), "first");
}
