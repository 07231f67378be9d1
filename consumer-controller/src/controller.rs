// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::activation::ActivationResolver;
use crate::block_fetcher::BlockFetcher;
use crate::commitment_log::CommitmentLog;
use crate::config::{ChainTopology, EvmConsumerConfig, ValidatedEvmConfig};
use crate::contracts::{FinalityProviderOracle, OutputOracle};
use crate::error::{ControllerError, ControllerResult};
use crate::finality::FinalizedHeightResolver;
use crate::metrics::ControllerMetrics;
use crate::rpc::{ChainSession, JsonRpcSession, MeteredSession, SessionOptions};
use crate::types::{BlockInfo, SignerId, VotingPowerRecord};
use crate::voting_power::VotingPowerResolver;
use async_trait::async_trait;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{error, info};

const L1_CHAIN_NAME: &str = "l1";
const CONSUMER_CHAIN_NAME: &str = "consumer";

/// Queries a finality-signing service runs against an EVM consumer chain.
///
/// Every call derives its answer from live RPC reads; nothing is cached and no
/// background task runs.
#[async_trait]
pub trait ConsumerController: Send + Sync {
    /// The block at the latest L2 height committed to L1.
    async fn query_latest_finalized_block(&self) -> ControllerResult<BlockInfo>;

    /// Ascending blocks from `start`, `min(end - start, limit)` of them.
    async fn query_blocks(
        &self,
        start: u64,
        end: u64,
        limit: u64,
    ) -> ControllerResult<Vec<BlockInfo>>;

    async fn query_block(&self, height: u64) -> ControllerResult<BlockInfo>;

    async fn query_is_block_finalized(&self, height: u64) -> ControllerResult<bool>;

    async fn query_finality_provider_voting_power(
        &self,
        signer: &SignerId,
        height: u64,
    ) -> ControllerResult<u64>;

    /// `None` when the signer has never had voting power.
    async fn query_activated_height(&self, signer: &SignerId) -> ControllerResult<Option<u64>>;

    async fn query_latest_block_height(&self) -> ControllerResult<u64>;

    /// Closes the chain sessions. Calling it again is a no-op.
    async fn close(&self) -> ControllerResult<()>;
}

pub type MeteredJsonRpcSession = MeteredSession<JsonRpcSession>;

pub struct EvmConsumerController<S> {
    l1: Arc<S>,
    consumer: Arc<S>,
    finality: FinalizedHeightResolver<S>,
    blocks: BlockFetcher<S>,
    voting_power: VotingPowerResolver<S>,
    activation: ActivationResolver<S>,
}

impl EvmConsumerController<MeteredJsonRpcSession> {
    /// Validates `config` and connects to the configured nodes.
    pub async fn new(
        config: &EvmConsumerConfig,
        metrics: Arc<ControllerMetrics>,
    ) -> ControllerResult<Self> {
        let config = config
            .validate()
            .tap_err(|e| error!("Invalid EVM consumer config: {}", e))?;

        let consumer = Arc::new(MeteredSession::new(
            JsonRpcSession::connect(
                CONSUMER_CHAIN_NAME,
                config.consumer_rpc_url.clone(),
                SessionOptions {
                    request_timeout: config.request_timeout,
                    expected_chain_id: config.expected_consumer_chain_id,
                },
            )
            .await?,
            metrics.clone(),
        ));

        let l1 = match (config.topology, &config.l1_rpc_url) {
            (ChainTopology::SingleChain, _) => {
                info!("Single-chain topology: oracles are read from the consumer chain");
                consumer.clone()
            }
            (ChainTopology::DualChain, Some(url)) => {
                let options = SessionOptions {
                    request_timeout: config.request_timeout,
                    expected_chain_id: config.expected_l1_chain_id,
                };
                match JsonRpcSession::connect(L1_CHAIN_NAME, url.clone(), options).await {
                    Ok(session) => Arc::new(MeteredSession::new(session, metrics.clone())),
                    Err(e) => {
                        consumer.close().await;
                        return Err(e);
                    }
                }
            }
            (ChainTopology::DualChain, None) => {
                consumer.close().await;
                return Err(ControllerError::Config(
                    "rpc-l1-address is required in dual-chain topology".to_string(),
                ));
            }
        };

        Ok(Self::from_sessions(l1, consumer, &config, metrics))
    }
}

impl<S: ChainSession> EvmConsumerController<S> {
    /// Builds a controller over already open sessions. `l1` and `consumer`
    /// may be the same session.
    pub fn from_sessions(
        l1: Arc<S>,
        consumer: Arc<S>,
        config: &ValidatedEvmConfig,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        let output_oracle = OutputOracle::new(l1.clone(), config.l2_output_oracle);
        let fp_oracle = FinalityProviderOracle::new(l1.clone(), config.fp_oracle);
        let finality = FinalizedHeightResolver::new(output_oracle.clone(), metrics);
        let commitments = CommitmentLog::new(output_oracle, config.log_scan);

        Self {
            blocks: BlockFetcher::new(
                consumer.clone(),
                config.max_batch_size,
                config.max_concurrent_batches,
            ),
            voting_power: VotingPowerResolver::new(
                finality.clone(),
                commitments.clone(),
                fp_oracle.clone(),
            ),
            activation: ActivationResolver::new(
                finality.clone(),
                commitments,
                fp_oracle,
                config.log_scan,
            ),
            finality,
            l1,
            consumer,
        }
    }

    pub fn l1_session(&self) -> &Arc<S> {
        &self.l1
    }

    pub fn consumer_session(&self) -> &Arc<S> {
        &self.consumer
    }

    pub fn blocks(&self) -> &BlockFetcher<S> {
        &self.blocks
    }

    /// Voting power together with the L1 block tag it was read at.
    pub async fn voting_power_record(
        &self,
        signer: &SignerId,
        height: u64,
    ) -> ControllerResult<VotingPowerRecord> {
        self.voting_power.voting_power_at(signer, height).await
    }
}

#[async_trait]
impl<S: ChainSession> ConsumerController for EvmConsumerController<S> {
    async fn query_latest_finalized_block(&self) -> ControllerResult<BlockInfo> {
        let height = self.finality.latest_finalized_height().await?;
        self.blocks
            .get_block(height)
            .await
            .map_err(|e| e.context("query latest finalized block"))
    }

    async fn query_blocks(
        &self,
        start: u64,
        end: u64,
        limit: u64,
    ) -> ControllerResult<Vec<BlockInfo>> {
        self.blocks.get_blocks(start, end, limit).await
    }

    async fn query_block(&self, height: u64) -> ControllerResult<BlockInfo> {
        self.blocks.get_block(height).await
    }

    async fn query_is_block_finalized(&self, height: u64) -> ControllerResult<bool> {
        self.finality.is_finalized(height).await
    }

    async fn query_finality_provider_voting_power(
        &self,
        signer: &SignerId,
        height: u64,
    ) -> ControllerResult<u64> {
        let record = self.voting_power_record(signer, height).await?;
        Ok(record.power)
    }

    async fn query_activated_height(&self, signer: &SignerId) -> ControllerResult<Option<u64>> {
        self.activation.activation_height(signer).await
    }

    async fn query_latest_block_height(&self) -> ControllerResult<u64> {
        let block = self.blocks.get_latest_block().await?;
        Ok(block.height)
    }

    async fn close(&self) -> ControllerResult<()> {
        self.consumer.close().await;
        if !Arc::ptr_eq(&self.l1, &self.consumer) {
            self.l1.close().await;
        }
        Ok(())
    }
}
