// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::commitment_log::CommitmentLog;
use crate::contracts::FinalityProviderOracle;
use crate::error::{ControllerError, ControllerResult};
use crate::finality::FinalizedHeightResolver;
use crate::rpc::ChainSession;
use crate::types::{BlockTag, SignerId, VotingPowerRecord};
use tracing::{debug, warn};

/// Reads a signer's voting power as of the L1 state that committed an L2 height.
#[derive(Debug)]
pub struct VotingPowerResolver<S> {
    finality: FinalizedHeightResolver<S>,
    commitments: CommitmentLog<S>,
    fp_oracle: FinalityProviderOracle<S>,
}

impl<S: ChainSession> VotingPowerResolver<S> {
    pub fn new(
        finality: FinalizedHeightResolver<S>,
        commitments: CommitmentLog<S>,
        fp_oracle: FinalityProviderOracle<S>,
    ) -> Self {
        Self {
            finality,
            commitments,
            fp_oracle,
        }
    }

    pub async fn voting_power_at(
        &self,
        signer: &SignerId,
        l2_height: u64,
    ) -> ControllerResult<VotingPowerRecord> {
        let chain_name = self.fp_oracle.session().chain_name();
        let latest = self
            .finality
            .latest_finalized_height()
            .await
            .map_err(|e| e.context("read latest finalized height"))?;

        // Heights not committed yet have no L1 state of their own, use the head
        let tag = if l2_height > latest {
            BlockTag::Latest
        } else {
            match self.commitments.first_with_l2_at_or_above(l2_height).await {
                Ok(event) => BlockTag::Number(event.l1_block_number),
                Err(ControllerError::EventNotFound(reason)) => {
                    warn!(
                        "[{}] Oracle reports L2 block {} as committed but its log disagrees ({}), reading latest state",
                        chain_name, l2_height, reason
                    );
                    BlockTag::Latest
                }
                Err(e) => {
                    return Err(e.context(format_args!(
                        "locate commitment of L2 block {}",
                        l2_height
                    )))
                }
            }
        };

        let power = self.fp_oracle.voting_power(signer, tag).await?;
        debug!(
            "[{}] Voting power of {} at L2 block {} (L1 {}): {}",
            chain_name, signer, l2_height, tag, power
        );
        Ok(VotingPowerRecord {
            signer_id: signer.clone(),
            power,
            at_l1_block: tag,
        })
    }
}
