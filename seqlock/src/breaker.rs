// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Exponential busy waiting with an upper bound.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::errors::SeqLockError;

/// Number of exponential backoff units a default breaker grants before
/// it trips. With 7 units the final wait burns `2^7` pause hints.
const DEFAULT_MAX_UNITS: u32 = 7;

/// # BusyBreaker
///
/// A [`BusyBreaker`] keeps the CPU busy for short, exponentially growing
/// delays between retries of a spin loop, and trips once its budget is
/// exhausted. It turns an open-ended retry loop into a bounded one for
/// callers that must not spin forever.
///
/// # Example
/// ```
/// use stronghold_seqlock::BusyBreaker;
///
/// let breaker = BusyBreaker::default();
/// while breaker.spin().is_ok() {
///     // retry some optimistic operation
/// }
/// ```
pub struct BusyBreaker {
    max_units: u32,
    unit: AtomicU32,
}

impl Default for BusyBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNITS)
    }
}

impl Clone for BusyBreaker {
    fn clone(&self) -> Self {
        Self {
            max_units: self.max_units,
            unit: AtomicU32::new(self.unit.load(Ordering::Acquire)),
        }
    }
}

impl BusyBreaker {
    /// Creates a new [`BusyBreaker`] granting `max_units` exponential
    /// backoff units before [`BusyBreaker::spin`] starts failing.
    pub const fn new(max_units: u32) -> Self {
        Self {
            max_units,
            unit: AtomicU32::new(0),
        }
    }

    /// Keeps the CPU busy for the next backoff unit, hinting the
    /// processor to yield pipeline resources to other hardware threads.
    ///
    /// [`core::hint::spin_loop()`] compiles to a pause-style instruction
    /// where the target has one and to a no-op otherwise.
    ///
    /// Returns [`SeqLockError::BreakerExhausted`] once the configured
    /// number of units has been consumed.
    pub fn spin(&self) -> Result<(), SeqLockError> {
        match self.unit.load(Ordering::Acquire) {
            unit if unit <= self.max_units => {
                for _ in 0..(1u32 << unit) {
                    core::hint::spin_loop();
                }
                self.unit.store(unit + 1, Ordering::Release);

                Ok(())
            }
            _ => Err(SeqLockError::BreakerExhausted),
        }
    }

    /// Resets the consumed budget to zero.
    pub fn reset(&self) {
        self.unit.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::BusyBreaker;

    #[test]
    fn test_breaker_trips_after_budget() {
        let breaker = BusyBreaker::new(3);

        // units 0..=3 succeed, the next call trips
        for _ in 0..4 {
            breaker.spin().expect("budget not yet exhausted");
        }
        assert!(breaker.spin().is_err());
    }

    #[test]
    fn test_breaker_reset_restores_budget() {
        let breaker = BusyBreaker::new(0);

        breaker.spin().expect("first unit");
        assert!(breaker.spin().is_err());

        breaker.reset();
        assert!(breaker.spin().is_ok());
    }

    #[test]
    fn test_clone_snapshots_consumed_budget() {
        let breaker = BusyBreaker::new(5);
        breaker.spin().expect("first unit");

        let copy = breaker.clone();
        breaker.reset();

        // the copy keeps the consumed unit, the original starts over
        for _ in 0..5 {
            copy.spin().expect("copied budget");
        }
        assert!(copy.spin().is_err());
        assert!(breaker.spin().is_ok());
    }
}
