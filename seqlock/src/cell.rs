// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! A payload-owning sequence-locked cell.
//!
//! [`SeqLockCell`] bundles a [`SeqLock`] with the data it protects.
//! Readers copy the payload out and validate the copy against the
//! counter; writers go through the spin variant of the lock and are safe
//! under any number of threads. The payload must be `Copy` and should be
//! small: the primitive does not make large structures readable
//! atomically, it only detects that a read overlapped a write.
//!
//! On the read side the payload is copied as a [`MaybeUninit`] through a
//! volatile load and only materialized after validation, so a copy torn
//! by a concurrent writer is discarded without ever being treated as a
//! value of `T`. On architectures that encode load/store ordering per
//! instruction the payload accesses themselves would need to be relaxed
//! atomic operations; no Rust target is of that class, the lock-word
//! fences order these plain accesses on all of them.

use std::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
    ptr,
};

use crate::{
    errors::SeqLockError,
    seqlock::{ReadStrategy, SeqLock, WriteGuard},
};

/// A `Copy` payload protected by a sequence lock.
///
/// # Example
/// ```
/// use stronghold_seqlock::SeqLockCell;
///
/// let cell = SeqLockCell::new([0u64; 2]);
///
/// cell.write([1, 2]);
/// assert_eq!(cell.read(), [1, 2]);
///
/// cell.update(|pair| pair[0] += 10);
/// assert_eq!(cell.read(), [11, 2]);
/// ```
pub struct SeqLockCell<T> {
    lock: SeqLock,
    data: UnsafeCell<T>,
}

// Readers copy the payload out instead of referencing it, so sharing the
// cell only requires the payload to be sendable.
unsafe impl<T: Send> Send for SeqLockCell<T> {}
unsafe impl<T: Send> Sync for SeqLockCell<T> {}

impl<T: Copy> SeqLockCell<T> {
    /// Creates a new cell at generation zero holding `value`.
    pub const fn new(value: T) -> Self {
        Self {
            lock: SeqLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn read_payload(&self) -> MaybeUninit<T> {
        // Volatile keeps the copy an actual memory read even though a
        // concurrent writer may race it; validation decides afterwards
        // whether the copy may be materialized.
        unsafe { ptr::read_volatile(self.data.get().cast::<MaybeUninit<T>>()) }
    }

    /// Reads the payload, re-executing the read until it observes a
    /// stable generation.
    ///
    /// Never blocks, but under sustained write pressure the number of
    /// re-executions is unbounded.
    #[inline]
    pub fn read(&self) -> T {
        let value = self.lock.read(|| self.read_payload());
        unsafe { value.assume_init() }
    }

    /// Attempts a single read window. Returns `None` when a writer was
    /// active at any point inside the window.
    #[inline]
    pub fn try_read(&self) -> Option<T> {
        let baseline = self.lock.read_lock();
        let value = self.read_payload();
        if self.lock.read_unlock(baseline) {
            Some(unsafe { value.assume_init() })
        } else {
            None
        }
    }

    /// Reads the payload with the retry loop driven by `strategy`.
    pub fn read_with_strategy(&self, strategy: &ReadStrategy) -> Result<T, SeqLockError> {
        let value = self.lock.read_with_strategy(strategy, || self.read_payload())?;
        Ok(unsafe { value.assume_init() })
    }

    /// Replaces the payload. Serializes against other writers through
    /// the counter, so this is safe under any number of writer threads.
    #[inline]
    pub fn write(&self, value: T) {
        let _guard = self.lock.write_lock_spin();
        unsafe {
            *self.data.get() = value;
        }
    }

    /// Replaces the payload under the externally-serialized write lock.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no other writer (neither
    /// [`SeqLockCell::write_exclusive`] nor any of the spin-locking write
    /// methods) runs concurrently. Concurrent writers race on the
    /// payload itself.
    pub unsafe fn write_exclusive(&self, value: T) {
        let _guard = self.lock.write_lock();
        *self.data.get() = value;
    }

    /// Mutates the payload in place inside a write critical section.
    ///
    /// If `f` unwinds, the section still closes and whatever partial
    /// state `f` left behind is committed as the next generation.
    #[inline]
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let mut guard = self.lock_write();
        f(&mut guard);
    }

    /// Opens a write critical section and returns a guard dereferencing
    /// to the payload. The section ends when the guard is dropped.
    #[inline]
    pub fn lock_write(&self) -> CellWriteGuard<'_, T> {
        CellWriteGuard {
            cell: self,
            _section: self.lock.write_lock_spin(),
        }
    }

    /// Consumes the cell, returning the payload.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the payload. The exclusive borrow
    /// guarantees no concurrent access, so no locking takes place.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Number of committed write generations.
    pub fn generation(&self) -> u32 {
        self.lock.generation()
    }

    /// Raw counter value; odd while a writer is inside.
    pub fn sequence(&self) -> u32 {
        self.lock.sequence()
    }

    /// Returns `true` while a writer is inside its critical section.
    pub fn is_write_locked(&self) -> bool {
        self.lock.is_write_locked()
    }
}

impl<T: Copy + Default> Default for SeqLockCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for SeqLockCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(value) => f.debug_struct("SeqLockCell").field("value", &value).finish(),
            None => f
                .debug_struct("SeqLockCell")
                .field("value", &"<write in progress>")
                .finish(),
        }
    }
}

/// RAII handle for a write critical section on a [`SeqLockCell`],
/// dereferencing to the payload.
///
/// Readers racing the guard holder re-execute their reads; they are
/// never blocked by the guard. Dropping the guard commits the payload as
/// the next generation.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CellWriteGuard<'a, T> {
    cell: &'a SeqLockCell<T>,
    _section: WriteGuard<'a>,
}

impl<T> Deref for CellWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.cell.data.get() }
    }
}

impl<T> DerefMut for CellWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.cell.data.get() }
    }
}
