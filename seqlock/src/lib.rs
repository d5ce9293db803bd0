// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Stronghold Sequence Lock
//!
//! This crate implements the sequence lock ("seqlock") synchronization
//! primitive: any number of lock-free readers observe a shared value while
//! writers update it without ever blocking the readers. A single counter
//! word carries the whole protocol. Its parity marks an active writer and
//! its upper bits count committed write generations. Readers never wait;
//! they detect an overlapping write afterwards and re-execute their read.
//!
//! The primitive pays off when reads vastly outnumber writes and must not
//! touch a mutex, e.g. for frequently polled counters or small state
//! structs. It is not a general purpose lock: there is no fairness and no
//! blocking anywhere.
//!
//! Two layers are exposed. [`SeqLock`] is the bare counter with the raw
//! protocol operations plus guard- and closure-based safe wrappers.
//! [`SeqLockCell`] owns a `Copy` payload and packages the read/write
//! protocol around it.
//!
//! # Example
//! ```
//! use stronghold_seqlock::SeqLockCell;
//!
//! static CELL: SeqLockCell<u64> = SeqLockCell::new(0);
//!
//! CELL.write(42);
//! assert_eq!(CELL.read(), 42);
//! ```

pub mod breaker;
pub mod cell;
pub mod errors;
pub mod seqlock;

pub use breaker::BusyBreaker;
pub use cell::{CellWriteGuard, SeqLockCell};
pub use errors::SeqLockError;
pub use seqlock::{ReadStrategy, SeqLock, WriteGuard};
