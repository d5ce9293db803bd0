// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The sequence counter primitive.
//!
//! A single `u32` word carries the whole lock. An odd value means a
//! writer is inside its critical section; an even value `2N` means
//! generation `N` is committed and stable. Writers move the counter odd
//! before touching protected data and even again afterwards; readers
//! sample the counter before and after their reads and re-execute the
//! read when the two samples disagree.

use std::sync::atomic::{compiler_fence, fence, AtomicU32, Ordering};

use log::*;

use crate::{breaker::BusyBreaker, errors::SeqLockError};

/// Retry behavior for the closure-driven read path.
///
/// [`ReadStrategy::Retry`] re-executes the read body an unbounded number
/// of times until it observes a stable generation. This terminates as
/// soon as writers quiesce, but under sustained write pressure a reader
/// may retry indefinitely. [`ReadStrategy::RetryWithBreaker`] bounds the
/// loop with an exponential [`BusyBreaker`]: the reader backs off between
/// attempts and gives up with an error once the breaker trips, trading
/// guaranteed convergence for a fallible call.
#[derive(Clone, Default)]
pub enum ReadStrategy {
    /// Re-execute the read body until it observes a stable generation.
    #[default]
    Retry,

    /// Back off exponentially between re-executions and abort once the
    /// breaker budget is exhausted.
    RetryWithBreaker(BusyBreaker),
}

/// A sequence lock over an external payload.
///
/// The lock consists of nothing but the sequence counter; the data it
/// protects is owned by the caller. Consistency of that data is a
/// protocol property, not a property of the data itself: writers must
/// perform all of their stores between [`SeqLock::write_lock`] (or
/// [`SeqLock::write_lock_spin`]) and the drop of the returned guard, and
/// readers must perform all of their loads inside a single
/// [`SeqLock::read_lock`] / [`SeqLock::read_unlock`] window, re-executing
/// the whole read when validation fails. [`SeqLock::read`] packages that
/// retry loop.
///
/// [`SeqLock::write_lock`] requires writers to be serialized externally.
/// Writers without such serialization use [`SeqLock::write_lock_spin`],
/// which serializes them through the counter itself.
///
/// Readers can never block a writer and a writer never waits for
/// readers; the only waiting in the whole protocol is writer-on-writer
/// spinning in [`SeqLock::write_lock_spin`].
///
/// # Example
/// ```
/// use stronghold_seqlock::SeqLock;
///
/// let lock = SeqLock::new();
///
/// {
///     let _guard = lock.write_lock();
///     // mutate the protected data
/// }
///
/// let value = lock.read(|| {
///     // load the protected data, produce a candidate result
///     42
/// });
/// assert_eq!(value, 42);
/// assert_eq!(lock.generation(), 1);
/// ```
#[derive(Debug)]
pub struct SeqLock {
    seq: AtomicU32,
}

impl SeqLock {
    /// Creates a new unlocked [`SeqLock`] at generation zero.
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
        }
    }

    /// Begins a write critical section, assuming external writer
    /// serialization.
    ///
    /// The caller must guarantee that no other writer attempts to lock
    /// concurrently, e.g. by performing all writes from one thread or
    /// inside an external critical section. Without that guarantee the
    /// counter is corrupted and reads may validate torn data; use
    /// [`SeqLock::write_lock_spin`] instead.
    ///
    /// Dropping the returned [`WriteGuard`] ends the critical section.
    #[inline]
    pub fn write_lock(&self) -> WriteGuard<'_> {
        let old = self.seq.load(Ordering::Relaxed);
        debug_assert!(old & 1 == 0, "write_lock requires externally serialized writers");

        let announced = old.wrapping_add(1);

        // Announce the odd value before any protected store. On targets
        // that encode store ordering per instruction the announcement is
        // hedged with a preceding relaxed store of the same value.
        #[cfg(feature = "hedged-release")]
        self.seq.store(announced, Ordering::Relaxed);
        self.seq.store(announced, Ordering::Release);

        // Two-way barrier: the translator must not mix protected stores
        // into the lock announcement.
        compiler_fence(Ordering::AcqRel);

        WriteGuard {
            lock: self,
            announced,
        }
    }

    /// Begins a write critical section, serializing against other
    /// writers through the counter itself.
    ///
    /// If another writer is mid-update the target baseline becomes that
    /// writer's eventual unlock value, so the compare-and-swap can only
    /// succeed after the unlock. The loop is unbounded: under
    /// pathological writer contention this spins without forward
    /// progress. Between attempts the processor receives a pause hint.
    ///
    /// Dropping the returned [`WriteGuard`] ends the critical section.
    #[inline]
    pub fn write_lock_spin(&self) -> WriteGuard<'_> {
        // Next even value at or above the current counter.
        let mut baseline = self.seq.load(Ordering::Relaxed).wrapping_add(1) & !1;
        loop {
            match self.seq.compare_exchange_weak(
                baseline,
                baseline.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return WriteGuard {
                        lock: self,
                        announced: baseline.wrapping_add(1),
                    }
                }
                Err(_) => {
                    core::hint::spin_loop();
                    baseline = self.seq.load(Ordering::Relaxed).wrapping_add(1) & !1;
                }
            }
        }
    }

    /// Ends a write critical section: restores even parity and advances
    /// the generation. Invoked by [`WriteGuard::drop`].
    #[inline]
    fn write_unlock(&self, announced: u32) {
        // All protected stores become visible before the new even value.
        self.seq.store(announced.wrapping_add(1), Ordering::Release);
    }

    /// Samples the counter and strips the in-progress bit, yielding the
    /// baseline generation value the subsequent read attempts to
    /// observe. Never blocks, even while a writer is active.
    #[inline]
    pub fn read_lock(&self) -> u32 {
        self.seq.load(Ordering::Acquire) & !1
    }

    /// Validates a read window opened by [`SeqLock::read_lock`].
    ///
    /// Returns `true` if the counter still equals `baseline`, i.e. no
    /// writer was active at any point inside the window and the candidate
    /// result is clean. On `false` the entire read body must be
    /// re-executed from [`SeqLock::read_lock`].
    #[inline]
    pub fn read_unlock(&self, baseline: u32) -> bool {
        // Two-way barrier: protected loads must not be mixed past the
        // validation point by the translator.
        compiler_fence(Ordering::AcqRel);

        // Load-load barrier: protected loads complete before the counter
        // is sampled again.
        fence(Ordering::Acquire);

        self.seq.load(Ordering::Acquire) == baseline
    }

    /// Executes `body` inside a read window, re-executing it until a
    /// stable generation is observed, and returns the last candidate
    /// result.
    ///
    /// `body` runs an unbounded but typically small number of times. It
    /// must not exit non-locally and must not perform externally visible
    /// side effects unless they are idempotent; a re-executed body that
    /// increments a shared counter, for instance, counts retries as
    /// reads. Results of discarded executions are dropped.
    ///
    /// Termination is guaranteed only once writers stop locking. See
    /// [`SeqLock::read_with_strategy`] for a bounded variant.
    #[inline]
    pub fn read<R>(&self, mut body: impl FnMut() -> R) -> R {
        loop {
            let baseline = self.read_lock();
            let candidate = body();
            if self.read_unlock(baseline) {
                return candidate;
            }
        }
    }

    /// Like [`SeqLock::read`], with the retry loop driven by `strategy`.
    ///
    /// With [`ReadStrategy::Retry`] this is exactly [`SeqLock::read`]
    /// and cannot fail. With [`ReadStrategy::RetryWithBreaker`] each
    /// failed validation consumes one breaker unit; once the breaker
    /// trips the read gives up with
    /// [`SeqLockError::BreakerExhausted`].
    pub fn read_with_strategy<R>(
        &self,
        strategy: &ReadStrategy,
        mut body: impl FnMut() -> R,
    ) -> Result<R, SeqLockError> {
        match strategy {
            ReadStrategy::Retry => Ok(self.read(body)),
            ReadStrategy::RetryWithBreaker(breaker) => {
                breaker.reset();
                loop {
                    let baseline = self.read_lock();
                    let candidate = body();
                    if self.read_unlock(baseline) {
                        return Ok(candidate);
                    }

                    trace!("read overlapped a write at baseline {}, backing off", baseline);
                    if let Err(e) = breaker.spin() {
                        debug!("read did not stabilize within the breaker budget");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Returns the raw counter value. Odd while a writer is inside its
    /// critical section.
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Returns the number of committed write generations. While a writer
    /// is active this is the generation the writer is about to commit.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.sequence() >> 1
    }

    /// Returns `true` while a writer is inside its critical section.
    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.sequence() & 1 == 1
    }
}

impl Default for SeqLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for a write critical section on a [`SeqLock`].
///
/// Dropping the guard performs the write unlock. Drop runs on every exit
/// path out of the caller's scope, unwinding included, so no abnormal
/// exit can leave the counter odd. The guard must not be leaked (e.g.
/// via [`std::mem::forget`]); a leaked guard keeps the lock odd forever
/// and every subsequent read retries without bound.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a SeqLock,
    announced: u32,
}

impl WriteGuard<'_> {
    /// The odd counter value published for this critical section.
    pub fn announced(&self) -> u32 {
        self.announced
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.write_unlock(self.announced);
    }
}
