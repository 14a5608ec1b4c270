//! Array allocation, construction failure and reuse.

use crate::common::*;
use std::mem;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
struct Elem {
    value: u64,
    tag: u64,
}

impl Default for Elem {
    fn default() -> Self {
        Elem { value: 7, tag: 0xE1 }
    }
}

impl Persistent for Elem {
    fn on_destroy(&mut self) {
        self.tag = 0;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
struct ArrayRoot {
    arr: PersistentPtr<Elem>,
}

impl Persistent for ArrayRoot {}

fn elems(pool: &Pool, arr: PersistentPtr<Elem>, n: u64) -> Vec<Elem> {
    (0..n).map(|i| pool.read(arr.add(i)).unwrap()).collect()
}

#[test]
fn array_alloc_free_and_realloc() {
    let tp = TestPool::new();
    let mut arr = tp.transaction(|tx| tx.alloc_array::<Elem>(5)).unwrap();
    assert!(elems(&tp, arr, 5).iter().all(|e| *e == Elem::default()));
    let first_off = arr.offset();

    tp.transaction(|tx| tx.free_array(&mut arr, 5)).unwrap();
    assert!(arr.is_null());

    let again = tp.transaction(|tx| tx.alloc_array::<Elem>(6)).unwrap();
    assert!(tp.usable_size(again).unwrap() >= 6 * mem::size_of::<Elem>() as u64);
    assert!(elems(&tp, again, 6).iter().all(|e| *e == Elem::default()));

    tp.transaction(|tx| tx.write(again.add(5), Elem { value: 1, tag: 1 }))
        .unwrap();
    let values = elems(&tp, again, 6);
    assert!(values[..5].iter().all(|e| *e == Elem::default()));
    assert_eq!(values[5], Elem { value: 1, tag: 1 });
    if again.offset() != first_off {
        assert!(tp.usable_size(PersistentPtr::<Elem>::new(tp.id(), first_off)).is_err());
    }
}

#[test]
fn failed_element_constructor_is_allocation_error() {
    let tp = TestPool::cache();
    let before = tp.stats();
    let err = tp
        .transaction(|tx| {
            tx.alloc_array_with(4, |i| {
                if i == 2 {
                    Err(Error::Type("element rejected".into()))
                } else {
                    Ok(Elem { value: i, tag: 1 })
                }
            })
        })
        .unwrap_err();
    assert!(matches!(err, Error::Allocation(_)));
    assert_eq!(tp.stats(), before);
}

#[test]
fn free_through_stored_pointer_rolls_back() {
    let tp = TestPool::new();
    let root = tp.root::<ArrayRoot>().unwrap();
    tp.transaction(|tx| {
        let arr = tx.alloc_array::<Elem>(3)?;
        tx.write(root.field(|r| &r.arr), arr)
    })
    .unwrap();
    let arr = tp.read(root).unwrap().arr;

    let err = tp
        .transaction(|tx| {
            tx.free_array_stored(root.field(|r| &r.arr), 3)?;
            assert_eq!(tp.read(arr.add(1))?.tag, 0);
            Err::<(), _>(tx.abort(-1))
        })
        .unwrap_err();
    assert!(err.is_abort());
    assert_eq!(tp.read(root).unwrap().arr, arr);
    assert!(elems(&tp, arr, 3).iter().all(|e| *e == Elem::default()));

    tp.transaction(|tx| tx.free_array_stored(root.field(|r| &r.arr), 3))
        .unwrap();
    assert!(tp.read(root).unwrap().arr.is_null());
    assert!(tp.usable_size(arr).is_err());
}
