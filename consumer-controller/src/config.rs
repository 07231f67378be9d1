// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ControllerError, ControllerResult};
use consumer_controller_config::Config;
use ethers::types::Address as EthAddress;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_EVM_RPC_ADDR: &str = "http://127.0.0.1:8545";

/// How the oracle contracts are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ChainTopology {
    /// OP-Stack style: oracles live on L1, blocks are read from the consumer chain.
    #[default]
    DualChain,
    /// Sidechain style: oracles and blocks live on the consumer chain itself.
    SingleChain,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmConsumerConfig {
    // Rpc url of the L1 node, where the oracle contracts are deployed.
    #[serde(default = "default_rpc_l1_address")]
    pub rpc_l1_address: String,
    // Rpc url of the consumer chain node, used for block queries.
    #[serde(default)]
    pub consumer_chain_address: String,
    // Address of the L2OutputOracle commitment contract.
    #[serde(default)]
    pub l2_output_oracle_address: String,
    // Address of the finality provider voting power oracle contract.
    #[serde(default)]
    pub fp_oracle_address: String,
    #[serde(default)]
    pub topology: ChainTopology,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_l1_chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_consumer_chain_id: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    // Number of block batches a range query keeps in flight at once.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    // Number of L1 blocks covered by a single eth_getLogs request.
    #[serde(default = "default_log_query_range")]
    pub log_query_range: u64,
    // First L1 block scanned for oracle events, usually the oracle deployment block.
    #[serde(default)]
    pub oracle_start_block: u64,
}

fn default_rpc_l1_address() -> String {
    DEFAULT_EVM_RPC_ADDR.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_batch_size() -> usize {
    500
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_log_query_range() -> u64 {
    10_000
}

impl Default for EvmConsumerConfig {
    fn default() -> Self {
        Self {
            rpc_l1_address: default_rpc_l1_address(),
            consumer_chain_address: String::new(),
            l2_output_oracle_address: String::new(),
            fp_oracle_address: String::new(),
            topology: ChainTopology::default(),
            expected_l1_chain_id: None,
            expected_consumer_chain_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_batch_size: default_max_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            log_query_range: default_log_query_range(),
            oracle_start_block: 0,
        }
    }
}

impl Config for EvmConsumerConfig {}

/// Parsed, checked configuration. Immutable once built.
#[derive(Clone, Debug)]
pub struct ValidatedEvmConfig {
    pub topology: ChainTopology,
    pub l1_rpc_url: Option<Url>,
    pub consumer_rpc_url: Url,
    pub l2_output_oracle: EthAddress,
    pub fp_oracle: EthAddress,
    pub expected_l1_chain_id: Option<u64>,
    pub expected_consumer_chain_id: Option<u64>,
    pub request_timeout: Duration,
    pub max_batch_size: usize,
    pub max_concurrent_batches: usize,
    pub log_scan: LogScanConfig,
}

/// Window of the chunked eth_getLogs scans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogScanConfig {
    pub start_block: u64,
    pub window: u64,
}

impl LogScanConfig {
    /// Consecutive inclusive `[from, to]` windows covering `from..=head`.
    pub fn windows(&self, from: u64, head: u64) -> LogWindows {
        LogWindows {
            next: Some(from).filter(|from| *from <= head),
            head,
            window: self.window.max(1),
        }
    }

    /// Number of windows `windows(from, head)` yields.
    pub fn window_count(&self, from: u64, head: u64) -> u64 {
        match head.checked_sub(from) {
            Some(span) => span / self.window.max(1) + 1,
            None => 0,
        }
    }

    /// The `index`-th window of `windows(from, head)`.
    pub fn window_at(&self, from: u64, head: u64, index: u64) -> (u64, u64) {
        let window = self.window.max(1);
        let start = from.saturating_add(index.saturating_mul(window));
        (start, start.saturating_add(window - 1).min(head))
    }
}

pub struct LogWindows {
    next: Option<u64>,
    head: u64,
    window: u64,
}

impl Iterator for LogWindows {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        let to = from.saturating_add(self.window - 1).min(self.head);
        self.next = to.checked_add(1).filter(|next| *next <= self.head);
        Some((from, to))
    }
}

impl EvmConsumerConfig {
    pub fn validate(&self) -> ControllerResult<ValidatedEvmConfig> {
        let l1_rpc_url = match self.topology {
            ChainTopology::DualChain => {
                Some(parse_rpc_url("rpc-l1-address", &self.rpc_l1_address)?)
            }
            ChainTopology::SingleChain if self.rpc_l1_address.is_empty() => None,
            ChainTopology::SingleChain => {
                Some(parse_rpc_url("rpc-l1-address", &self.rpc_l1_address)?)
            }
        };
        let consumer_rpc_url =
            parse_rpc_url("consumer-chain-address", &self.consumer_chain_address)?;
        let l2_output_oracle =
            parse_contract_address("l2-output-oracle-address", &self.l2_output_oracle_address)?;
        let fp_oracle = parse_contract_address("fp-oracle-address", &self.fp_oracle_address)?;

        if self.request_timeout_secs == 0 {
            return Err(ControllerError::Config(
                "request-timeout-secs must be positive".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ControllerError::Config(
                "max-batch-size must be positive".to_string(),
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ControllerError::Config(
                "max-concurrent-batches must be positive".to_string(),
            ));
        }
        if self.log_query_range == 0 {
            return Err(ControllerError::Config(
                "log-query-range must be positive".to_string(),
            ));
        }

        Ok(ValidatedEvmConfig {
            topology: self.topology,
            l1_rpc_url,
            consumer_rpc_url,
            l2_output_oracle,
            fp_oracle,
            expected_l1_chain_id: self.expected_l1_chain_id,
            expected_consumer_chain_id: self.expected_consumer_chain_id,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_batch_size: self.max_batch_size,
            max_concurrent_batches: self.max_concurrent_batches,
            log_scan: LogScanConfig {
                start_block: self.oracle_start_block,
                window: self.log_query_range,
            },
        })
    }
}

fn parse_rpc_url(field: &str, value: &str) -> ControllerResult<Url> {
    let url = Url::parse(value).map_err(|e| {
        ControllerError::Config(format!("{} is not correctly formatted: {}", field, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ControllerError::Config(format!(
            "{} uses unsupported scheme {:?}, expected http or https",
            field, scheme
        ))),
    }
}

fn parse_contract_address(field: &str, value: &str) -> ControllerResult<EthAddress> {
    if value.is_empty() {
        return Err(ControllerError::Config(format!("{} is not set", field)));
    }
    let address = EthAddress::from_str(value).map_err(|e| {
        ControllerError::Config(format!("{} is not a valid address: {}", field, e))
    })?;
    if address.is_zero() {
        return Err(ControllerError::Config(format!(
            "{} must not be the zero address",
            field
        )));
    }
    Ok(address)
}
