// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! L2 finality as seen from L1
//!
//! A consumer-chain block is final once the commitment oracle on L1 has
//! recorded an output covering it. The oracle's `latestBlockNumber()` is the
//! only source of truth; nothing is cached between calls.
//!
//! ```text
//!   FinalizedHeightResolver
//!     + latest_finalized_height() -> u64    latestBlockNumber() at L1 latest
//!     + next_block_number() -> u64          nextBlockNumber() at L1 latest
//!     + is_finalized(height) -> bool        height <= latest_finalized_height()
//! ```

mod resolver;

pub use resolver::FinalizedHeightResolver;
