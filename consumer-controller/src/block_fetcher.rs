// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ControllerError, ControllerResult};
use crate::rpc::ChainSession;
use crate::types::{BlockInfo, BlockTag, RawBlock};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Reads consumer-chain blocks and turns them into [`BlockInfo`].
///
/// Range reads are split into batches of `max_batch_size` heights. At most
/// `max_concurrent_batches` of them are in flight at once, and heights of a
/// batch are only materialized when the batch is sent.
#[derive(Debug)]
pub struct BlockFetcher<S> {
    session: Arc<S>,
    max_batch_size: usize,
    max_concurrent_batches: usize,
}

impl<S> Clone for BlockFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            max_batch_size: self.max_batch_size,
            max_concurrent_batches: self.max_concurrent_batches,
        }
    }
}

impl<S: ChainSession> BlockFetcher<S> {
    pub fn new(session: Arc<S>, max_batch_size: usize, max_concurrent_batches: usize) -> Self {
        Self {
            session,
            max_batch_size: max_batch_size.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
        }
    }

    pub async fn get_block(&self, height: u64) -> ControllerResult<BlockInfo> {
        let raw = self
            .session
            .get_block(height)
            .await
            .map_err(|e| e.context(format_args!("get block {}", height)))?
            .ok_or(ControllerError::NotFound { height })?;
        decode_at(&raw, height)
    }

    pub async fn get_latest_block(&self) -> ControllerResult<BlockInfo> {
        let raw = self
            .session
            .get_header(BlockTag::Latest)
            .await
            .map_err(|e| e.context("get latest block"))?
            .ok_or_else(|| {
                ControllerError::Rpc(format!(
                    "{} node returned no latest block",
                    self.session.chain_name()
                ))
            })?;
        raw.decode()
    }

    /// Blocks `start, start + 1, ...`, at most `limit` of them and none at or
    /// above `end`.
    pub async fn get_blocks(
        &self,
        start: u64,
        end: u64,
        limit: u64,
    ) -> ControllerResult<Vec<BlockInfo>> {
        let count = block_count(start, end, limit)?;
        let batch = self.max_batch_size as u64;
        let last = start + count;
        let chunks = (start..last)
            .step_by(self.max_batch_size)
            .map(move |from| (from..last.min(from.saturating_add(batch))).collect());
        self.fetch(chunks, count).await
    }

    /// Same selection rule as [`Self::get_blocks`], walking down from `end - 1`.
    pub async fn get_blocks_descending(
        &self,
        start: u64,
        end: u64,
        limit: u64,
    ) -> ControllerResult<Vec<BlockInfo>> {
        let count = block_count(start, end, limit)?;
        let batch = self.max_batch_size as u64;
        let lowest = end - count;
        let chunks = (0..count).step_by(self.max_batch_size).map(move |offset| {
            let top = end - offset;
            (top.saturating_sub(batch).max(lowest)..top).rev().collect()
        });
        self.fetch(chunks, count).await
    }

    async fn fetch<I>(&self, chunks: I, count: u64) -> ControllerResult<Vec<BlockInfo>>
    where
        I: Iterator<Item = Vec<u64>> + Send,
    {
        if count == 0 {
            return Ok(vec![]);
        }
        debug!(
            "[{}] Fetching {} blocks in batches of {}, {} at a time",
            self.session.chain_name(),
            count,
            self.max_batch_size,
            self.max_concurrent_batches
        );

        // buffered keeps the chunk order regardless of completion order
        let batches: Vec<Vec<BlockInfo>> = stream::iter(chunks)
            .map(|heights| self.fetch_batch(heights))
            .buffered(self.max_concurrent_batches)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    async fn fetch_batch(&self, heights: Vec<u64>) -> ControllerResult<Vec<BlockInfo>> {
        let (Some(first), Some(last)) = (heights.first(), heights.last()) else {
            return Ok(vec![]);
        };
        let raws = self
            .session
            .batch_get_blocks(&heights)
            .await
            .map_err(|e| e.context(format_args!("batch get blocks [{}..={}]", first, last)))?;
        if raws.len() != heights.len() {
            return Err(ControllerError::Rpc(format!(
                "requested {} blocks, node answered {}",
                heights.len(),
                raws.len()
            )));
        }
        heights
            .iter()
            .zip(raws)
            .map(|(height, raw)| {
                let raw = raw.ok_or(ControllerError::NotFound { height: *height })?;
                decode_at(&raw, *height)
            })
            .collect()
    }
}

fn block_count(start: u64, end: u64, limit: u64) -> ControllerResult<u64> {
    if end < start {
        return Err(ControllerError::InvalidRange { start, end });
    }
    Ok((end - start).min(limit))
}

fn decode_at(raw: &RawBlock, height: u64) -> ControllerResult<BlockInfo> {
    let info = raw
        .decode()
        .map_err(|e| e.context(format_args!("block {}", height)))?;
    if info.height != height {
        return Err(ControllerError::Decode(format!(
            "requested block {} but node returned block {}",
            height, info.height
        )));
    }
    Ok(info)
}
