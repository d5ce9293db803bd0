// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Errors of the additive retry-strategy surface. The core protocol
/// operations never fail; contract violations there are not detectable
/// at runtime and are documented on the operations themselves.
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum SeqLockError {
    #[error("busy breaker exhausted its spin budget")]
    BreakerExhausted,
}
