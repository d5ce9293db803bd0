// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # Sequence lock benches
//!
//! Test subjects:
//! - uncontended payload reads (the hot path the primitive exists for)
//! - write generation advance
//! - reads racing a saturating writer (retry amplification)

use contention::*;
use criterion::{criterion_group, criterion_main};

// all contention benches
criterion_group!(
    benches,
    bnc_cell_read,
    bnc_cell_write,
    bnc_cell_read_under_writes,
    bnc_generation_advance
);

// main
criterion_main!(benches);
