//! Typed iteration over live allocations
//!
//! Visits every live object allocated with `T`'s type number, in allocation
//! order. The cursor holds only the last visited sequence number and
//! re-queries the heap on each step, so objects allocated or freed while
//! iterating are seen or skipped accordingly. The root object is never
//! visited.

use nvobj_core::{Error, Persistent, PersistentPtr, Result};
use nvobj_storage::ObjectInfo;
use std::marker::PhantomData;

use crate::pool::Pool;

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Start,
    At(ObjectInfo),
    End,
}

/// Cursor over the live objects of type `T`.
pub struct ObjIter<'p, T> {
    pool: &'p Pool,
    cursor: Cursor,
    _marker: PhantomData<fn() -> T>,
}

impl<'p, T: Persistent> ObjIter<'p, T> {
    fn new(pool: &'p Pool) -> Self {
        ObjIter {
            pool,
            cursor: Cursor::Start,
            _marker: PhantomData,
        }
    }

    fn settle(&mut self) {
        if let Cursor::Start = self.cursor {
            self.cursor = match self.pool.heap.next_of_type(T::type_num(), None) {
                Some(info) => Cursor::At(info),
                None => Cursor::End,
            };
        }
    }

    /// True once the cursor has passed the last object.
    pub fn is_end(&mut self) -> bool {
        self.settle();
        matches!(self.cursor, Cursor::End)
    }

    /// Object under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfRange` past the end.
    pub fn current(&mut self) -> Result<PersistentPtr<T>> {
        self.pool.ensure_open()?;
        self.settle();
        match self.cursor {
            Cursor::At(info) => Ok(PersistentPtr::new(self.pool.id(), info.off)),
            _ => Err(Error::OutOfRange(format!(
                "iterator over {} is past the end",
                T::type_name()
            ))),
        }
    }

    /// Move to the next object.
    ///
    /// # Errors
    ///
    /// Returns `Error::OutOfRange` if already past the end.
    pub fn advance(&mut self) -> Result<()> {
        self.pool.ensure_open()?;
        self.settle();
        let Cursor::At(info) = self.cursor else {
            return Err(Error::OutOfRange(format!(
                "cannot advance iterator over {} past the end",
                T::type_name()
            )));
        };
        self.cursor = match self.pool.heap.next_of_type(T::type_num(), Some(info.seq)) {
            Some(next) => Cursor::At(next),
            None => Cursor::End,
        };
        Ok(())
    }

    /// Rewind to the first object.
    pub fn restart(&mut self) {
        self.cursor = Cursor::Start;
    }
}

impl<'p, T: Persistent> Iterator for ObjIter<'p, T> {
    type Item = PersistentPtr<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.current().ok()?;
        self.advance().ok()?;
        Some(ptr)
    }
}

impl Pool {
    /// Iterate the live objects allocated as `T`.
    pub fn iter<T: Persistent>(&self) -> ObjIter<'_, T> {
        ObjIter::new(self)
    }
}
