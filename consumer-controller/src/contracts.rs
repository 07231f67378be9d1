// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bindings for the two oracle contracts the controller reads.
//!
//! * `L2OutputOracle` commits L2 heights to L1 and emits
//!   `OutputProposed(bytes32 indexed outputRoot, uint256 indexed l2OutputIndex,
//!   uint256 indexed l2BlockNumber, uint256 l1Timestamp)`.
//! * The finality provider oracle stores voting power per signer key and emits
//!   `VotingPowerUpdated(bytes32 indexed fpPubKeyHash, uint256 oldPower, uint256 newPower)`.
//!
//! Only view calls and log decoding live here; which block to read at is the
//! resolvers' business.

use crate::error::{ControllerError, ControllerResult};
use crate::rpc::ChainSession;
use crate::types::{u256_to_u64, BlockTag, CommitmentEvent, SignerId, VotingPowerUpdate};
use ethers::abi::{decode, encode, long_signature, ParamType, Token};
use ethers::types::{Address as EthAddress, Bytes, Filter, Log, H256, U256};
use ethers::utils::id;
use std::sync::Arc;
use tracing::debug;

const LATEST_BLOCK_NUMBER: &str = "latestBlockNumber()";
const NEXT_BLOCK_NUMBER: &str = "nextBlockNumber()";
const VOTING_POWER: &str = "votingPower(bytes)";

pub fn output_proposed_topic() -> H256 {
    long_signature(
        "OutputProposed",
        &[
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ],
    )
}

pub fn voting_power_updated_topic() -> H256 {
    long_signature(
        "VotingPowerUpdated",
        &[
            ParamType::FixedBytes(32),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ],
    )
}

fn call_data(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(args));
    Bytes::from(data)
}

fn decode_uint(output: &[u8], what: &str) -> ControllerResult<U256> {
    let mut tokens = decode(&[ParamType::Uint(256)], output)
        .map_err(|e| {
            ControllerError::Decode(format!("{} returned {} bytes: {}", what, output.len(), e))
        })?;
    match tokens.pop() {
        Some(Token::Uint(value)) => Ok(value),
        other => Err(ControllerError::Decode(format!(
            "{} returned unexpected token {:?}",
            what, other
        ))),
    }
}

fn log_block_number(log: &Log, event: &str) -> ControllerResult<u64> {
    log.block_number
        .map(|n| n.as_u64())
        .ok_or_else(|| ControllerError::Decode(format!("{} log has no block number", event)))
}

// Safeguard: a node must only hand back logs of the contract we asked about
fn ensure_logs_from(logs: &[Log], address: EthAddress) -> ControllerResult<()> {
    match logs.iter().find(|log| log.address != address) {
        Some(log) => Err(ControllerError::Rpc(format!(
            "provider returned logs from a different contract (expected: {:?}): {:?}",
            address, log
        ))),
        None => Ok(()),
    }
}

pub fn decode_output_proposed(log: &Log) -> ControllerResult<CommitmentEvent> {
    if log.topics.len() != 4 || log.topics[0] != output_proposed_topic() {
        return Err(ControllerError::Decode(format!(
            "log is not an OutputProposed event: {:?}",
            log.topics
        )));
    }
    let output_index =
        u256_to_u64(U256::from_big_endian(log.topics[2].as_bytes()), "l2OutputIndex")?;
    let l2_block_number =
        u256_to_u64(U256::from_big_endian(log.topics[3].as_bytes()), "l2BlockNumber")?;
    let timestamp = u256_to_u64(decode_uint(&log.data, "OutputProposed data")?, "l1Timestamp")?;
    Ok(CommitmentEvent {
        l1_block_number: log_block_number(log, "OutputProposed")?,
        l2_block_number,
        output_index,
        timestamp,
    })
}

pub fn decode_voting_power_updated(
    log: &Log,
    signer: &SignerId,
) -> ControllerResult<VotingPowerUpdate> {
    if log.topics.len() != 2 || log.topics[0] != voting_power_updated_topic() {
        return Err(ControllerError::Decode(format!(
            "log is not a VotingPowerUpdated event: {:?}",
            log.topics
        )));
    }
    if log.topics[1] != signer.topic() {
        return Err(ControllerError::Rpc(format!(
            "provider returned VotingPowerUpdated for another signer (expected topic {:?}, got {:?})",
            signer.topic(),
            log.topics[1]
        )));
    }
    let tokens = decode(&[ParamType::Uint(256), ParamType::Uint(256)], &log.data)
        .map_err(|e| ControllerError::Decode(format!("VotingPowerUpdated data: {}", e)))?;
    let (old_power, new_power) = match tokens.as_slice() {
        [Token::Uint(old), Token::Uint(new)] => (*old, *new),
        other => {
            return Err(ControllerError::Decode(format!(
                "VotingPowerUpdated data has unexpected tokens {:?}",
                other
            )))
        }
    };
    Ok(VotingPowerUpdate {
        l1_block_number: log_block_number(log, "VotingPowerUpdated")?,
        old_power,
        new_power,
    })
}

/// Read access to the `L2OutputOracle` commitment contract.
#[derive(Debug)]
pub struct OutputOracle<S> {
    session: Arc<S>,
    address: EthAddress,
}

impl<S> Clone for OutputOracle<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            address: self.address,
        }
    }
}

impl<S: ChainSession> OutputOracle<S> {
    pub fn new(session: Arc<S>, address: EthAddress) -> Self {
        Self { session, address }
    }

    pub fn address(&self) -> EthAddress {
        self.address
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Latest L2 height committed to L1.
    pub async fn latest_block_number(&self) -> ControllerResult<u64> {
        self.read_uint(LATEST_BLOCK_NUMBER).await
    }

    /// L2 height the next commitment is expected to cover.
    pub async fn next_block_number(&self) -> ControllerResult<u64> {
        self.read_uint(NEXT_BLOCK_NUMBER).await
    }

    /// Latest L2 height committed as of the end of L1 block `l1_block`.
    ///
    /// Zero before the oracle is deployed: a call to an address without code
    /// returns no data.
    pub async fn latest_block_number_at(&self, l1_block: u64) -> ControllerResult<u64> {
        let tag = BlockTag::Number(l1_block);
        let output = self
            .session
            .call(self.address, call_data(LATEST_BLOCK_NUMBER, &[]), tag)
            .await
            .map_err(|e| e.context(format_args!("{} at {}", LATEST_BLOCK_NUMBER, tag)))?;
        if output.is_empty() {
            return Ok(0);
        }
        u256_to_u64(decode_uint(&output, LATEST_BLOCK_NUMBER)?, LATEST_BLOCK_NUMBER)
    }

    async fn read_uint(&self, signature: &str) -> ControllerResult<u64> {
        let output = self
            .session
            .call(self.address, call_data(signature, &[]), BlockTag::Latest)
            .await
            .map_err(|e| e.context(signature))?;
        u256_to_u64(decode_uint(&output, signature)?, signature)
    }

    /// `OutputProposed` events logged in the inclusive L1 range `[from, to]`,
    /// in log order.
    pub async fn commitment_events(
        &self,
        from: u64,
        to: u64,
    ) -> ControllerResult<Vec<CommitmentEvent>> {
        let filter = Filter::new()
            .address(self.address)
            .topic0(output_proposed_topic())
            .from_block(from)
            .to_block(to);
        let logs = self
            .session
            .filter_logs(&filter)
            .await
            .map_err(|e| e.context(format_args!("scan OutputProposed events in [{}, {}]", from, to)))?;
        ensure_logs_from(&logs, self.address)?;

        let events = logs
            .iter()
            .filter(|log| log.removed != Some(true))
            .map(decode_output_proposed)
            .collect::<ControllerResult<Vec<_>>>()?;

        // Binary searches downstream rely on this ordering
        if let Some(pair) = events.windows(2).find(|pair| {
            pair[1].l1_block_number < pair[0].l1_block_number
                || pair[1].l2_block_number < pair[0].l2_block_number
        }) {
            return Err(ControllerError::Decode(format!(
                "OutputProposed events are out of order: {:?} followed by {:?}",
                pair[0], pair[1]
            )));
        }
        debug!(
            "[{}] {} OutputProposed events in L1 blocks [{}, {}]",
            self.session.chain_name(),
            events.len(),
            from,
            to
        );
        Ok(events)
    }
}

/// Read access to the finality provider voting power oracle.
#[derive(Debug)]
pub struct FinalityProviderOracle<S> {
    session: Arc<S>,
    address: EthAddress,
}

impl<S> Clone for FinalityProviderOracle<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            address: self.address,
        }
    }
}

impl<S: ChainSession> FinalityProviderOracle<S> {
    pub fn new(session: Arc<S>, address: EthAddress) -> Self {
        Self { session, address }
    }

    pub fn address(&self) -> EthAddress {
        self.address
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub async fn voting_power(&self, signer: &SignerId, tag: BlockTag) -> ControllerResult<u64> {
        let data = call_data(VOTING_POWER, &[Token::Bytes(signer.as_bytes().to_vec())]);
        let output = self
            .session
            .call(self.address, data, tag)
            .await
            .map_err(|e| e.context(format_args!("votingPower({}) at {}", signer, tag)))?;
        u256_to_u64(decode_uint(&output, VOTING_POWER)?, "voting power")
    }

    /// `VotingPowerUpdated` events of `signer` in the inclusive L1 range `[from, to]`.
    pub async fn voting_power_events(
        &self,
        signer: &SignerId,
        from: u64,
        to: u64,
    ) -> ControllerResult<Vec<VotingPowerUpdate>> {
        let filter = Filter::new()
            .address(self.address)
            .topic0(voting_power_updated_topic())
            .topic1(signer.topic())
            .from_block(from)
            .to_block(to);
        let logs = self
            .session
            .filter_logs(&filter)
            .await
            .map_err(|e| e.context(format_args!("scan VotingPowerUpdated events in [{}, {}]", from, to)))?;
        ensure_logs_from(&logs, self.address)?;

        let updates = logs
            .iter()
            .filter(|log| log.removed != Some(true))
            .map(|log| decode_voting_power_updated(log, signer))
            .collect::<ControllerResult<Vec<_>>>()?;
        if let Some(pair) = updates
            .windows(2)
            .find(|pair| pair[1].l1_block_number < pair[0].l1_block_number)
        {
            return Err(ControllerError::Decode(format!(
                "VotingPowerUpdated events are out of order: {:?} followed by {:?}",
                pair[0], pair[1]
            )));
        }
        Ok(updates)
    }
}
