//! Stale dispatch slots are rewritten the first time an object is resolved.

use super::*;

#[test]
fn reopened_object_gets_working_dispatch() {
    let tp = TestPool::with_types(animal_types());
    let dog = tp.alloc_atomic(Dog::new(3)).unwrap();
    assert_eq!(tp.read(dog).unwrap().base.speak().unwrap(), "woof");

    scribble_slot(&tp, dog);
    let tp = tp.reopen();

    let back = tp.read(dog).unwrap();
    assert!(back.base.ops.is_valid());
    assert_eq!(back.base.speak().unwrap(), "woof");
    assert_eq!(back.tricks, 3);
    // SAFETY: reading the slot as a plain word.
    let word = unsafe { dog.cast::<u64>() };
    assert_eq!(tp.read(word).unwrap(), Dog::template().base.ops.raw());
}

#[test]
fn any_resolution_inside_allocation_repairs_it() {
    let tp = TestPool::with_types(animal_types());
    let cat = tp.alloc_atomic(Cat::new()).unwrap();
    scribble_slot(&tp, cat);
    let tp = tp.reopen();

    // a projection to a plain field still carries the allocation's type
    let lives = tp.read(cat.field(|c| &c.lives)).unwrap();
    assert_eq!(lives, 9);
    let raw = tp.direct(cat).unwrap();
    // SAFETY: the mapping outlives this read and nothing writes concurrently.
    let slot = unsafe { raw.as_ref().base.ops };
    assert!(slot.is_valid());
}

#[test]
fn stale_slot_is_reported_not_followed() {
    let stale = Animal {
        ops: DispatchSlot::from_raw(0xdead_beef_0000_0008),
        legs: 4,
    };
    assert!(!stale.ops.is_valid());
    assert!(matches!(stale.speak(), Err(Error::Type(_))));
}

#[test]
fn every_array_element_is_repaired() {
    let tp = TestPool::with_types(animal_types());
    let dogs = tp
        .transaction(|tx| tx.alloc_array_with(4, |i| Ok(Dog::new(i))))
        .unwrap();
    for i in 0..4 {
        scribble_slot(&tp, dogs.add(i));
    }
    let tp = tp.reopen();

    // resolving one element repairs the whole allocation
    assert_eq!(tp.read(dogs.add(2)).unwrap().base.speak().unwrap(), "woof");
    for i in 0..4 {
        // SAFETY: reading the slot as a plain word.
        let word = unsafe { dogs.add(i).cast::<u64>() };
        assert_eq!(tp.read(word).unwrap(), Dog::template().base.ops.raw());
        assert_eq!(tp.read(dogs.add(i)).unwrap().tricks, i);
    }
}

#[test]
fn rolled_back_slot_is_repaired_again() {
    let tp = TestPool::with_types(animal_types());
    let dog = tp.alloc_atomic(Dog::new(1)).unwrap();
    scribble_slot(&tp, dog);
    let tp = tp.reopen();

    let _ = tp.transaction(|tx| {
        // repaired on first resolution, then logged and changed
        tx.update(dog, |d| d.tricks = 2)?;
        Err::<(), _>(tx.abort(-1))
    });
    let back = tp.read(dog).unwrap();
    assert_eq!(back.tricks, 1);
    assert_eq!(back.base.speak().unwrap(), "woof");
}

#[test]
fn unregistered_polymorphic_type_is_refused() {
    let tp = TestPool::cache();
    assert!(matches!(
        tp.alloc_atomic(Dog::new(0)),
        Err(Error::Type(_))
    ));
    let err = tp
        .transaction(|tx| tx.alloc(Cat::new()))
        .unwrap_err();
    assert!(matches!(err, Error::Type(_)));

    // a plain allocation viewed as an animal cannot be repaired
    let plain = tp.alloc_atomic(PairRoot { a: 1, b: 4 }).unwrap();
    // SAFETY: the read is expected to fail before any bytes are used.
    let as_animal = unsafe { plain.cast::<Animal>() };
    assert!(matches!(tp.read(as_animal), Err(Error::Type(_))));
}

#[test]
fn duplicate_registration_is_type_error() {
    let types = animal_types();
    assert_eq!(types.len(), 2);
    assert!(matches!(types.register::<Dog>(), Err(Error::Type(_))));
    assert!(types.is_registered::<Cat>());
    assert_eq!(types.len(), 2);
}
