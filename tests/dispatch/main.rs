//! Polymorphic objects: registration, repair after reopen and pointer casts.

#[path = "../common/mod.rs"]
mod common;

mod casts;
mod repair;

use common::*;
use std::sync::Arc;

/// Dispatch table shared by every animal.
pub struct AnimalOps {
    pub speak: fn(&Animal) -> &'static str,
}

fn bark(_: &Animal) -> &'static str {
    "woof"
}

fn purr(_: &Animal) -> &'static str {
    "meow"
}

static DOG_OPS: AnimalOps = AnimalOps { speak: bark };
static CAT_OPS: AnimalOps = AnimalOps { speak: purr };

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Animal {
    pub ops: DispatchSlot<AnimalOps>,
    pub legs: u64,
}

impl Animal {
    pub fn speak(&self) -> Result<&'static str> {
        Ok((self.ops.table()?.speak)(self))
    }
}

impl Persistent for Animal {
    fn dispatch_offsets() -> &'static [usize] {
        &[0]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Dog {
    pub base: Animal,
    pub tricks: u64,
}

impl Dog {
    pub fn new(tricks: u64) -> Self {
        Dog {
            base: Animal {
                ops: DispatchSlot::new(&DOG_OPS),
                legs: 4,
            },
            tricks,
        }
    }
}

impl Persistent for Dog {
    fn dispatch_offsets() -> &'static [usize] {
        &[0]
    }
}

impl Polymorphic for Dog {
    fn template() -> Self {
        Dog::new(0)
    }
}

// SAFETY: `Dog` is repr(C) with `Animal` as its first field.
unsafe impl Extends<Animal> for Dog {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Cat {
    pub base: Animal,
    pub lives: u64,
}

impl Cat {
    pub fn new() -> Self {
        Cat {
            base: Animal {
                ops: DispatchSlot::new(&CAT_OPS),
                legs: 4,
            },
            lives: 9,
        }
    }
}

impl Persistent for Cat {
    fn dispatch_offsets() -> &'static [usize] {
        &[0]
    }
}

impl Polymorphic for Cat {
    fn template() -> Self {
        Cat::new()
    }
}

// SAFETY: `Cat` is repr(C) with `Animal` as its first field.
unsafe impl Extends<Animal> for Cat {}

/// Registry with both animals.
pub fn animal_types() -> Arc<TypeRegistry> {
    let types = TypeRegistry::new();
    types.register::<Dog>().expect("register Dog");
    types.register::<Cat>().expect("register Cat");
    Arc::new(types)
}

/// Overwrite the dispatch slot at `ptr` with a word no process image owns.
pub fn scribble_slot<T: Persistent>(pool: &Pool, ptr: PersistentPtr<T>) {
    // SAFETY: every polymorphic type here keeps its slot at offset 0.
    let word = unsafe { ptr.cast::<u64>() };
    pool.write_persist(word, &0xdead_beef_0000_0008).expect("scribble");
}
