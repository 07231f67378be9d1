// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ControllerError, ControllerResult};
use ethers::types::{H256, U256};
use ethers::utils::{hex, keccak256};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Immutable snapshot of one consumer-chain block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub height: u64,
    #[serde(serialize_with = "serialize_hex")]
    pub hash: Vec<u8>,
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
}

/// Point-in-time tag of an EVM read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => write!(f, "latest"),
            BlockTag::Number(n) => write!(f, "0x{:x}", n),
        }
    }
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Block header as it crosses the wire: hex strings, not yet trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl RawBlock {
    pub fn new(height: u64, hash: H256) -> Self {
        Self {
            number: Some(format!("0x{:x}", height)),
            hash: Some(format!("{:#x}", hash)),
        }
    }

    pub fn decode(&self) -> ControllerResult<BlockInfo> {
        let number = self
            .number
            .as_deref()
            .ok_or_else(|| ControllerError::Decode("block has no number".to_string()))?;
        let height = decode_quantity(number)?;
        let hash = self.hash.as_deref().ok_or_else(|| {
            ControllerError::Decode(format!("block {} has no hash", height))
        })?;
        let hash = decode_hash(hash)
            .map_err(|e| e.context(format_args!("hash of block {}", height)))?;
        Ok(BlockInfo {
            height,
            hash: hash.as_bytes().to_vec(),
        })
    }
}

/// Decodes a JSON-RPC quantity (`0x`-prefixed, big-endian hex) into a u64.
pub fn decode_quantity(value: &str) -> ControllerResult<u64> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ControllerError::Decode(format!("quantity {:?} lacks 0x prefix", value)))?;
    if digits.is_empty() {
        return Err(ControllerError::Decode(format!(
            "quantity {:?} has no digits",
            value
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ControllerError::Decode(format!("quantity {:?}: {}", value, e)))
}

pub fn decode_hash(value: &str) -> ControllerResult<H256> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ControllerError::Decode(format!("hash {:?} lacks 0x prefix", value)))?;
    let bytes = hex::decode(digits)
        .map_err(|e| ControllerError::Decode(format!("hash {:?}: {}", value, e)))?;
    if bytes.len() != 32 {
        return Err(ControllerError::Decode(format!(
            "hash {:?} has {} bytes, expected 32",
            value,
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

/// Converts a uint256 read from a contract into a u64, refusing to truncate.
pub fn u256_to_u64(value: U256, what: &str) -> ControllerResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(ControllerError::Decode(format!(
            "{} {} does not fit in u64",
            what, value
        )));
    }
    Ok(value.as_u64())
}

/// Public key of a finality signer (x-only or compressed secp256k1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignerId(Vec<u8>);

impl SignerId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> ControllerResult<Self> {
        let bytes = bytes.into();
        match bytes.len() {
            32 | 33 => Ok(Self(bytes)),
            n => Err(ControllerError::Decode(format!(
                "signer public key has {} bytes, expected 32 or 33",
                n
            ))),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Indexed topic under which the oracle logs this signer's power changes.
    pub fn topic(&self) -> H256 {
        H256::from(keccak256(&self.0))
    }
}

impl FromStr for SignerId {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| ControllerError::Decode(format!("signer public key {:?}: {}", s, e)))?;
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// An `OutputProposed` log: the L1 commitment of an L2 height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitmentEvent {
    pub l1_block_number: u64,
    pub l2_block_number: u64,
    pub output_index: u64,
    pub timestamp: u64,
}

/// A `VotingPowerUpdated` log of the finality-provider oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingPowerUpdate {
    pub l1_block_number: u64,
    pub old_power: U256,
    pub new_power: U256,
}

impl VotingPowerUpdate {
    /// True when the update moves the signer's power away from zero.
    pub fn is_activation(&self) -> bool {
        self.old_power.is_zero() && !self.new_power.is_zero()
    }
}

/// A signer's power as read from the oracle at `at_l1_block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingPowerRecord {
    pub signer_id: SignerId,
    pub power: u64,
    pub at_l1_block: BlockTag,
}
