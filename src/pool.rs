//! Fixed-capacity object pool with generation-checked handles.
//!
//! The pool never grows: all slots are reserved up front and recycled
//! through an index free list, so allocation and release are O(1) and do
//! not touch the global allocator. Every slot carries a generation counter
//! that is bumped on release, which lets [`Handle`] reject stale indices
//! after the slot has been handed out again.

use crate::error::{PoolError, PoolResult};
use core::fmt;
use core::marker::PhantomData;

const NIL: u32 = u32::MAX;

/// Typed reference to a live slot in a [`Pool<T>`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Slot index inside the pool.
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

// Manual impls: the derives would require `T: Clone` etc.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: u32 },
}

/// Allocation counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub allocations: u64,
    pub frees: u64,
    pub failed_allocations: u64,
}

/// Fixed-size arena with an index free list.
///
/// `Pool` is not internally synchronized; owners keep it behind their own
/// lock, the way the stack trace registry does.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_head: u32,
    len: usize,
    allocations: u64,
    frees: u64,
    failed_allocations: u64,
}

impl<T> Pool<T> {
    /// Create a pool with exactly `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not fit in a `u32` index.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity < NIL as usize, "pool capacity too large");

        let slots = (0..capacity)
            .map(|i| Slot::Vacant {
                generation: 0,
                next_free: if i + 1 < capacity { (i + 1) as u32 } else { NIL },
            })
            .collect();

        Self {
            slots,
            free_head: if capacity > 0 { 0 } else { NIL },
            len: 0,
            allocations: 0,
            frees: 0,
            failed_allocations: 0,
        }
    }

    /// Move `value` into a free slot.
    ///
    /// Fails with [`PoolError::Exhausted`] when every slot is in use; the
    /// value is dropped and existing occupants are untouched.
    pub fn alloc(&mut self, value: T) -> PoolResult<Handle<T>> {
        if self.free_head == NIL {
            self.failed_allocations += 1;
            return Err(PoolError::Exhausted);
        }

        let index = self.free_head;
        let slot = &mut self.slots[index as usize];
        let (generation, next_free) = match *slot {
            Slot::Vacant { generation, next_free } => (generation, next_free),
            Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };

        *slot = Slot::Occupied { generation, value };
        self.free_head = next_free;
        self.len += 1;
        self.allocations += 1;

        Ok(Handle {
            index,
            generation,
            _marker: PhantomData,
        })
    }

    /// Return the slot behind `handle` to the free list and hand back its value.
    pub fn free(&mut self, handle: Handle<T>) -> PoolResult<T> {
        if !self.contains(handle) {
            return Err(PoolError::StaleHandle);
        }

        let slot = &mut self.slots[handle.index as usize];
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next_free: self.free_head,
        };

        match core::mem::replace(slot, vacant) {
            Slot::Occupied { value, .. } => {
                self.free_head = handle.index;
                self.len -= 1;
                self.frees += 1;
                Ok(value)
            }
            Slot::Vacant { .. } => unreachable!("contains() checked occupancy"),
        }
    }

    /// Whether `handle` still refers to a live slot.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        matches!(
            self.slots.get(handle.index as usize),
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation
        )
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_head == NIL
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            in_use: self.len,
            allocations: self.allocations,
            frees: self.frees,
            failed_allocations: self.failed_allocations,
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}
