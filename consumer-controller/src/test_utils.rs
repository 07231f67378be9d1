// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::contracts::{output_proposed_topic, voting_power_updated_topic};
use crate::error::{ControllerError, ControllerResult};
use crate::rpc::ChainSession;
use crate::types::{BlockTag, RawBlock, SignerId};
use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use ethers::abi::Token;
use ethers::types::{Address as EthAddress, Bytes, Filter, Log, ValueOrArray, H256, U256, U64};
use ethers::utils::id;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use url::Url;

static INIT: Once = Once::new();

pub fn init_for_testing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Starts a JSON-RPC node stub on a free local port. Every POST body is
/// answered with `respond(body)`, after the returned delay if any.
pub async fn spawn_json_rpc_stub<F>(respond: F) -> Url
where
    F: Fn(Value) -> (Option<Duration>, Value) + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    let app = Router::new().route(
        "/",
        post(move |Json(body): Json<Value>| {
            let respond = respond.clone();
            async move {
                let (delay, response) = respond(body);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Json(response)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

/// Deterministic, non-zero block hash used by the mock chain.
pub fn block_hash_for_testing(height: u64) -> H256 {
    H256::from_low_u64_be(height.wrapping_add(0xb10c))
}

pub fn signer_for_testing(seed: u8) -> SignerId {
    let mut bytes = vec![0x02];
    bytes.extend([seed; 32]);
    SignerId::from_bytes(bytes).unwrap()
}

fn uint_topic(value: u64) -> H256 {
    H256::from_low_u64_be(value)
}

/// An `OutputProposed` log at L1 block `l1_block` committing `l2_block`.
pub fn output_proposed_log(address: EthAddress, l1_block: u64, l2_block: u64, index: u64) -> Log {
    Log {
        address,
        topics: vec![
            output_proposed_topic(),
            H256::from_low_u64_be(l2_block ^ 0xfeed),
            uint_topic(index),
            uint_topic(l2_block),
        ],
        data: ethers::abi::encode(&[Token::Uint(U256::from(1_700_000_000 + l1_block))]).into(),
        block_number: Some(U64::from(l1_block)),
        log_index: Some(U256::from(index)),
        ..Default::default()
    }
}

pub fn voting_power_log(
    address: EthAddress,
    signer: &SignerId,
    l1_block: u64,
    old_power: u64,
    new_power: u64,
) -> Log {
    Log {
        address,
        topics: vec![voting_power_updated_topic(), signer.topic()],
        data: ethers::abi::encode(&[
            Token::Uint(U256::from(old_power)),
            Token::Uint(U256::from(new_power)),
        ])
        .into(),
        block_number: Some(U64::from(l1_block)),
        ..Default::default()
    }
}

type CallKey = (EthAddress, Vec<u8>, Option<BlockTag>);

#[derive(Debug, Default)]
struct MockChainState {
    chain_id: u64,
    blocks: BTreeMap<u64, RawBlock>,
    logs: Vec<Log>,
    unfiltered_logs: bool,
    output_oracle: Option<EthAddress>,
    call_responses: HashMap<CallKey, ControllerResult<Vec<u8>>>,
    failures: HashMap<String, ControllerError>,
    recorded_calls: Vec<(EthAddress, Vec<u8>, BlockTag)>,
    log_queries: Vec<(Option<u64>, Option<u64>)>,
    batch_sizes: Vec<usize>,
    closed: bool,
}

/// In-memory chain serving canned blocks, logs and view-call results, and
/// recording what was asked of it. Clones share state.
#[derive(Debug, Clone)]
pub struct MockChainSession {
    chain_name: String,
    state: Arc<Mutex<MockChainState>>,
}

impl MockChainSession {
    pub fn new(chain_name: &str) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            state: Arc::new(Mutex::new(MockChainState {
                chain_id: 1,
                ..Default::default()
            })),
        }
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn add_blocks(&self, heights: impl IntoIterator<Item = u64>) {
        let mut state = self.state.lock().unwrap();
        for height in heights {
            state
                .blocks
                .insert(height, RawBlock::new(height, block_hash_for_testing(height)));
        }
    }

    /// Serves `block` when `height` is requested, whatever it contains.
    pub fn add_raw_block(&self, height: u64, block: RawBlock) {
        self.state.lock().unwrap().blocks.insert(height, block);
    }

    pub fn add_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Makes `filter_logs` ignore the address and topics of the filter.
    pub fn serve_unfiltered_logs(&self) {
        self.state.lock().unwrap().unfiltered_logs = true;
    }

    /// Answers `latestBlockNumber()` of `oracle` at historical block tags
    /// from the `OutputProposed` logs added so far, the way the contract
    /// state evolves on chain. Responses registered for an exact tag win.
    pub fn derive_output_oracle_state(&self, oracle: EthAddress) {
        self.state.lock().unwrap().output_oracle = Some(oracle);
    }

    /// `tag: None` answers the call at any block tag.
    pub fn add_call_response(
        &self,
        to: EthAddress,
        data: Vec<u8>,
        tag: Option<BlockTag>,
        response: ControllerResult<Vec<u8>>,
    ) {
        self.state
            .lock()
            .unwrap()
            .call_responses
            .insert((to, data, tag), response);
    }

    pub fn add_uint_call_response(
        &self,
        to: EthAddress,
        data: Vec<u8>,
        tag: Option<BlockTag>,
        value: impl Into<U256>,
    ) {
        let output = ethers::abi::encode(&[Token::Uint(value.into())]);
        self.add_call_response(to, data, tag, Ok(output));
    }

    /// Every later request of `method` fails with `err`.
    pub fn fail_method(&self, method: &str, err: ControllerError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(method.to_string(), err);
    }

    pub fn recorded_calls(&self) -> Vec<(EthAddress, Vec<u8>, BlockTag)> {
        self.state.lock().unwrap().recorded_calls.clone()
    }

    pub fn log_queries(&self) -> Vec<(Option<u64>, Option<u64>)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().batch_sizes.clone()
    }

    pub fn call_count(&self, to: EthAddress) -> usize {
        self.recorded_calls()
            .iter()
            .filter(|(address, _, _)| *address == to)
            .count()
    }

    fn check(&self, method: &str) -> ControllerResult<()> {
        let state = self.state.lock().unwrap();
        if state.closed {
            return Err(ControllerError::ConnectionClosed(format!(
                "{} on {}",
                method, self.chain_name
            )));
        }
        match state.failures.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl MockChainState {
    fn committed_at(&self, oracle: EthAddress, l1_block: u64) -> u64 {
        self.logs
            .iter()
            .filter(|log| {
                log.address == oracle
                    && log.topics.first() == Some(&output_proposed_topic())
                    && log.block_number.map_or(false, |n| n.as_u64() <= l1_block)
            })
            .filter_map(|log| log.topics.get(3))
            .map(|topic| U256::from_big_endian(topic.as_bytes()).as_u64())
            .max()
            .unwrap_or_default()
    }

    fn derived_call(&self, to: EthAddress, data: &[u8], tag: BlockTag) -> Option<Vec<u8>> {
        match (self.output_oracle, tag) {
            (Some(oracle), BlockTag::Number(l1_block))
                if oracle == to && data == id("latestBlockNumber()").as_slice() =>
            {
                let committed = self.committed_at(oracle, l1_block);
                Some(ethers::abi::encode(&[Token::Uint(U256::from(committed))]))
            }
            _ => None,
        }
    }
}

fn topic_matches(expected: &Option<ValueOrArray<Option<H256>>>, actual: Option<&H256>) -> bool {
    match expected {
        None | Some(ValueOrArray::Value(None)) => true,
        Some(ValueOrArray::Value(Some(topic))) => actual == Some(topic),
        Some(ValueOrArray::Array(topics)) => topics
            .iter()
            .any(|topic| topic.is_none() || topic.as_ref() == actual),
    }
}

fn log_matches(filter: &Filter, log: &Log) -> bool {
    let address_ok = match &filter.address {
        None => true,
        Some(ValueOrArray::Value(address)) => *address == log.address,
        Some(ValueOrArray::Array(addresses)) => addresses.contains(&log.address),
    };
    address_ok
        && filter
            .topics
            .iter()
            .enumerate()
            .all(|(i, expected)| topic_matches(expected, log.topics.get(i)))
}

#[async_trait]
impl ChainSession for MockChainSession {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    fn endpoint(&self) -> &str {
        "mock://chain"
    }

    async fn chain_id(&self) -> ControllerResult<u64> {
        self.check("eth_chainId")?;
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn get_header(&self, tag: BlockTag) -> ControllerResult<Option<RawBlock>> {
        self.check("eth_getBlockByNumber")?;
        let state = self.state.lock().unwrap();
        Ok(match tag {
            BlockTag::Latest => state.blocks.values().next_back().cloned(),
            BlockTag::Number(height) => state.blocks.get(&height).cloned(),
        })
    }

    async fn batch_get_blocks(&self, heights: &[u64]) -> ControllerResult<Vec<Option<RawBlock>>> {
        self.check("eth_getBlockByNumber_batch")?;
        let mut state = self.state.lock().unwrap();
        state.batch_sizes.push(heights.len());
        Ok(heights
            .iter()
            .map(|height| state.blocks.get(height).cloned())
            .collect())
    }

    async fn filter_logs(&self, filter: &Filter) -> ControllerResult<Vec<Log>> {
        self.check("eth_getLogs")?;
        let from = filter.get_from_block().map(|n| n.as_u64());
        let to = filter.get_to_block().map(|n| n.as_u64());
        let mut state = self.state.lock().unwrap();
        state.log_queries.push((from, to));
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|n| n.as_u64()).unwrap_or_default();
                from.map_or(true, |from| block >= from)
                    && to.map_or(true, |to| block <= to)
                    && (state.unfiltered_logs || log_matches(filter, log))
            })
            .cloned()
            .collect())
    }

    async fn call(&self, to: EthAddress, data: Bytes, tag: BlockTag) -> ControllerResult<Bytes> {
        self.check("eth_call")?;
        let mut state = self.state.lock().unwrap();
        state.recorded_calls.push((to, data.to_vec(), tag));
        let response = state
            .call_responses
            .get(&(to, data.to_vec(), Some(tag)))
            .cloned()
            .or_else(|| state.derived_call(to, &data, tag).map(Ok))
            .or_else(|| state.call_responses.get(&(to, data.to_vec(), None)).cloned())
            .unwrap_or_else(|| {
                Err(ControllerError::ContractCall(format!(
                    "no mock response for call to {:?} at {}",
                    to, tag
                )))
            });
        response.map(Bytes::from)
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
