// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::contracts::OutputOracle;
use crate::error::ControllerResult;
use crate::metrics::ControllerMetrics;
use crate::rpc::ChainSession;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FinalizedHeightResolver<S> {
    oracle: OutputOracle<S>,
    metrics: Arc<ControllerMetrics>,
}

impl<S> Clone for FinalizedHeightResolver<S> {
    fn clone(&self) -> Self {
        Self {
            oracle: self.oracle.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: ChainSession> FinalizedHeightResolver<S> {
    pub fn new(oracle: OutputOracle<S>, metrics: Arc<ControllerMetrics>) -> Self {
        Self { oracle, metrics }
    }

    pub fn oracle(&self) -> &OutputOracle<S> {
        &self.oracle
    }

    /// Latest L2 height committed to L1.
    pub async fn latest_finalized_height(&self) -> ControllerResult<u64> {
        let chain_name = self.oracle.session().chain_name();
        let height = self
            .oracle
            .latest_block_number()
            .await
            .tap_err(|e| warn!("[{}] Failed to read latest finalized L2 block: {}", chain_name, e))?;
        self.metrics.last_finalized_l2_block.set(height as i64);
        debug!("[{}] Latest finalized L2 block: {}", chain_name, height);
        Ok(height)
    }

    pub async fn next_block_number(&self) -> ControllerResult<u64> {
        self.oracle.next_block_number().await
    }

    pub async fn is_finalized(&self, height: u64) -> ControllerResult<bool> {
        let latest = self.latest_finalized_height().await?;
        let finalized = height <= latest;
        debug!(
            "[{}] Block {} finalized: {} (latest finalized: {})",
            self.oracle.session().chain_name(),
            height,
            finalized,
            latest
        );
        Ok(finalized)
    }
}
