//! Widening and checked narrowing between related persistent types.

use super::*;

#[test]
fn upcast_reads_base_through_derived_allocation() {
    let tp = TestPool::with_types(animal_types());
    let dog = tp.alloc_atomic(Dog::new(5)).unwrap();
    let cat = tp.alloc_atomic(Cat::new()).unwrap();

    let animals = [dog.upcast::<Animal>(), cat.upcast::<Animal>()];
    assert_eq!(animals[0].oid(), dog.oid());
    let voices: Vec<_> = animals
        .iter()
        .map(|a| tp.read(*a).unwrap().speak().unwrap())
        .collect();
    assert_eq!(voices, ["woof", "meow"]);
}

#[test]
fn downcast_checks_allocation_type() {
    let tp = TestPool::with_types(animal_types());
    let dog = tp.alloc_atomic(Dog::new(8)).unwrap();
    let cat = tp.alloc_atomic(Cat::new()).unwrap();

    let as_animal = dog.upcast::<Animal>();
    let back = tp.downcast::<Dog, Animal>(as_animal).unwrap();
    assert_eq!(back, dog);
    assert_eq!(tp.read(back).unwrap().tricks, 8);

    let wrong = tp.downcast::<Dog, Animal>(cat.upcast());
    assert!(matches!(wrong, Err(Error::Type(_))));
}

#[test]
fn upcast_after_reopen_repairs_derived_slots() {
    let tp = TestPool::with_types(animal_types());
    let cat = tp.alloc_atomic(Cat::new()).unwrap();
    scribble_slot(&tp, cat);
    let tp = tp.reopen();

    let animal = tp.read(cat.upcast::<Animal>()).unwrap();
    assert_eq!(animal.speak().unwrap(), "meow");
    assert_eq!(tp.read(cat).unwrap().lives, 9);
}
