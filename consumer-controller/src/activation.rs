// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::commitment_log::CommitmentLog;
use crate::config::LogScanConfig;
use crate::contracts::FinalityProviderOracle;
use crate::error::{ControllerError, ControllerResult};
use crate::finality::FinalizedHeightResolver;
use crate::rpc::ChainSession;
use crate::types::SignerId;
use tracing::{debug, info};

/// Finds the L2 height from which a signer takes part in finality voting.
#[derive(Debug)]
pub struct ActivationResolver<S> {
    finality: FinalizedHeightResolver<S>,
    commitments: CommitmentLog<S>,
    fp_oracle: FinalityProviderOracle<S>,
    scan: LogScanConfig,
}

impl<S: ChainSession> ActivationResolver<S> {
    pub fn new(
        finality: FinalizedHeightResolver<S>,
        commitments: CommitmentLog<S>,
        fp_oracle: FinalityProviderOracle<S>,
        scan: LogScanConfig,
    ) -> Self {
        Self {
            finality,
            commitments,
            fp_oracle,
            scan,
        }
    }

    /// `None` when the signer was never granted voting power. Otherwise the
    /// L2 height of the first commitment made at or after the activation, or
    /// the next height to be committed when no such commitment exists yet.
    pub async fn activation_height(&self, signer: &SignerId) -> ControllerResult<Option<u64>> {
        let chain_name = self.fp_oracle.session().chain_name();
        let Some(activated_at) = self.first_activation_block(signer).await? else {
            info!("[{}] Signer {} has no voting power history", chain_name, signer);
            return Ok(None);
        };

        match self.commitments.first_with_l1_at_or_above(activated_at).await {
            Ok(event) => {
                debug!(
                    "[{}] Signer {} activated at L1 block {}, first committed L2 block {}",
                    chain_name, signer, activated_at, event.l2_block_number
                );
                Ok(Some(event.l2_block_number))
            }
            Err(ControllerError::EventNotFound(_)) => {
                let next = self
                    .finality
                    .next_block_number()
                    .await
                    .map_err(|e| e.context("read next L2 block to commit"))?;
                debug!(
                    "[{}] Signer {} activated at L1 block {} after the latest commitment, next L2 block {}",
                    chain_name, signer, activated_at, next
                );
                Ok(Some(next))
            }
            Err(e) => Err(e.context(format_args!(
                "locate commitment after activation of {}",
                signer
            ))),
        }
    }

    async fn first_activation_block(&self, signer: &SignerId) -> ControllerResult<Option<u64>> {
        let head = self
            .fp_oracle
            .session()
            .latest_block_number()
            .await
            .map_err(|e| e.context("read L1 head"))?;

        // query may fail if range is too big
        for (from, to) in self.scan.windows(self.scan.start_block, head) {
            let updates = self.fp_oracle.voting_power_events(signer, from, to).await?;
            if let Some(update) = updates.iter().find(|update| update.is_activation()) {
                return Ok(Some(update.l1_block_number));
            }
        }
        Ok(None)
    }
}
