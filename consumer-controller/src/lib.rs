// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Finality controller for EVM consumer chains.
//!
//! Answers, from live RPC reads, which consumer-chain blocks are committed to
//! L1, what voting power a finality signer holds at a given height, and from
//! which height the signer is active. See [`controller::ConsumerController`].

pub mod activation;
pub mod block_fetcher;
pub mod commitment_log;
pub mod config;
pub mod contracts;
pub mod controller;
pub mod error;
pub mod finality;
pub mod metrics;
pub mod rpc;
pub mod types;
pub mod voting_power;

#[cfg(test)]
pub mod test_utils;

pub use controller::{ConsumerController, EvmConsumerController};
pub use error::{ControllerError, ControllerResult};
