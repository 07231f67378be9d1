// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain RPC gateway.
//!
//! A [`ChainSession`] is one open connection to an EVM JSON-RPC endpoint. The
//! controller only ever talks to chains through this trait, so the same
//! resolvers run against an L1 node, a consumer-chain node, or a test double.
//!
//! ```text
//!   MeteredSession<S>  (query counters, latency, error labels)
//!          │
//!          ▼
//!   JsonRpcSession     (HTTP JSON-RPC, batching, deadline, close)
//! ```
//!
//! Sessions perform no caching, retries or rate limiting. Every request runs
//! under the session's deadline and fails with `Timeout` when it expires;
//! after `close()` every request fails with `ConnectionClosed`.

mod json_rpc;
mod metered;

pub use json_rpc::{JsonRpcSession, SessionOptions};
pub use metered::MeteredSession;

use crate::error::{ControllerError, ControllerResult};
use crate::types::{BlockTag, RawBlock};
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, Bytes, Filter, Log};
use std::fmt::Debug;

#[async_trait]
pub trait ChainSession: Send + Sync + Debug {
    /// Chain identifier for logging/metrics
    fn chain_name(&self) -> &str;

    /// Endpoint this session is connected to
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> ControllerResult<u64>;

    /// `eth_getBlockByNumber` without transaction bodies. `None` when the
    /// node has no block for the tag.
    async fn get_header(&self, tag: BlockTag) -> ControllerResult<Option<RawBlock>>;

    async fn get_block(&self, height: u64) -> ControllerResult<Option<RawBlock>> {
        self.get_header(BlockTag::Number(height)).await
    }

    /// Fetches several blocks in one batched request. The result has the same
    /// length and order as `heights`; any failed sub-call fails the batch.
    async fn batch_get_blocks(&self, heights: &[u64]) -> ControllerResult<Vec<Option<RawBlock>>>;

    async fn filter_logs(&self, filter: &Filter) -> ControllerResult<Vec<Log>>;

    /// `eth_call` of a view function, evaluated against state as of `tag`.
    async fn call(&self, to: EthAddress, data: Bytes, tag: BlockTag) -> ControllerResult<Bytes>;

    /// Idempotent. In-flight requests fail with `ConnectionClosed`.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    /// Height of the chain head.
    async fn latest_block_number(&self) -> ControllerResult<u64> {
        let header = self
            .get_header(BlockTag::Latest)
            .await?
            .ok_or_else(|| {
                ControllerError::Rpc(format!(
                    "{} node returned no latest block",
                    self.chain_name()
                ))
            })?;
        Ok(header.decode()?.height)
    }
}
