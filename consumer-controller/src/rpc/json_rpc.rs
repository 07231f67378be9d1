// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP JSON-RPC session for EVM nodes.

use super::ChainSession;
use crate::error::{ControllerError, ControllerResult};
use crate::types::{BlockTag, RawBlock};
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, Bytes, Filter, Log, U64};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Deadline applied to every request of the session
    pub request_timeout: Duration,
    /// When set, `connect` fails unless the node reports this chain id
    pub expected_chain_id: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            expected_chain_id: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct JsonRpcSession {
    chain_name: String,
    url: Url,
    http_client: reqwest::Client,
    request_id: Arc<AtomicU64>,
    request_timeout: Duration,
    closed: CancellationToken,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn into_result(self, method: &str) -> ControllerResult<Value> {
        if let Some(error) = self.error {
            let data = error
                .data
                .map(|data| format!(" (data: {})", data))
                .unwrap_or_default();
            return Err(ControllerError::Rpc(format!(
                "{} failed with code {}: {}{}",
                method, error.code, error.message, data
            )));
        }
        // A null result is valid, e.g. a block the node does not have
        Ok(self.result.unwrap_or(Value::Null))
    }
}

impl JsonRpcSession {
    /// Builds a session without touching the network.
    pub fn new(
        chain_name: impl Into<String>,
        url: Url,
        request_timeout: Duration,
    ) -> ControllerResult<Self> {
        let chain_name = chain_name.into();
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()
            .map_err(|e| {
                ControllerError::Connection(format!(
                    "failed to build HTTP client for the {} RPC server {}: {}",
                    chain_name, url, e
                ))
            })?;
        Ok(Self {
            chain_name,
            url,
            http_client,
            request_id: Arc::new(AtomicU64::new(1)),
            request_timeout,
            closed: CancellationToken::new(),
        })
    }

    /// Opens a session and validates the chain identifier of the node.
    pub async fn connect(
        chain_name: impl Into<String>,
        url: Url,
        options: SessionOptions,
    ) -> ControllerResult<Self> {
        let session = Self::new(chain_name, url, options.request_timeout)?;
        let chain_id = session.chain_id().await.map_err(|e| {
            ControllerError::Connection(format!(
                "failed to connect to the {} RPC server {}: {}",
                session.chain_name, session.url, e
            ))
        })?;

        match options.expected_chain_id {
            Some(expected) if expected != chain_id => {
                return Err(ControllerError::Config(format!(
                    "Chain ID mismatch on {}: expected {}, got {}. This could indicate connecting to the wrong network!",
                    session.chain_name, expected, chain_id
                )));
            }
            Some(_) => info!(
                "[{}] Connected to {} (chain {} verified)",
                session.chain_name, session.url, chain_id
            ),
            None => info!(
                "[{}] Connected to {} (chain {}, not verified)",
                session.chain_name, session.url, chain_id
            ),
        }
        Ok(session)
    }

    fn next_ids(&self, count: u64) -> u64 {
        self.request_id.fetch_add(count, Ordering::SeqCst)
    }

    fn closed_error(&self, method: &str) -> ControllerError {
        ControllerError::ConnectionClosed(format!(
            "{} on {} session {}",
            method, self.chain_name, self.url
        ))
    }

    fn transport_error(&self, method: &str, err: reqwest::Error) -> ControllerError {
        if err.is_timeout() {
            ControllerError::Timeout(format!("{} on {}: {}", method, self.chain_name, err))
        } else if err.is_connect() {
            ControllerError::Connection(format!("{} on {}: {}", method, self.chain_name, err))
        } else {
            ControllerError::Rpc(format!("{} on {}: {}", method, self.chain_name, err))
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T, method: &str) -> ControllerResult<Value> {
        if self.closed.is_cancelled() {
            return Err(self.closed_error(method));
        }

        let request = async {
            let response = self
                .http_client
                .post(self.url.clone())
                .json(body)
                .send()
                .await
                .map_err(|e| self.transport_error(method, e))?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(ControllerError::Rpc(format!(
                    "{} returned HTTP {}: {}",
                    method, status, error_text
                )));
            }

            response.json::<Value>().await.map_err(|e| {
                if e.is_timeout() {
                    self.transport_error(method, e)
                } else {
                    ControllerError::Decode(format!("{} returned malformed JSON: {}", method, e))
                }
            })
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.closed_error(method)),
            result = tokio::time::timeout(self.request_timeout, request) => match result {
                Ok(result) => result,
                Err(_) => Err(ControllerError::Timeout(format!(
                    "{} on {} exceeded {:?}",
                    method, self.chain_name, self.request_timeout
                ))),
            },
        }
    }

    async fn send<R: DeserializeOwned>(&self, method: &str, params: Value) -> ControllerResult<R> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_ids(1),
        };
        debug!("[{}] >>> {} id={}", self.chain_name, method, request.id);

        let body = self.post(&request, method).await?;
        let response: JsonRpcResponse = serde_json::from_value(body).map_err(|e| {
            ControllerError::Decode(format!("{} response is not a JSON-RPC object: {}", method, e))
        })?;
        let result = response.into_result(method)?;
        serde_json::from_value(result)
            .map_err(|e| ControllerError::Decode(format!("{} result: {}", method, e)))
    }
}

#[async_trait]
impl ChainSession for JsonRpcSession {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    async fn chain_id(&self) -> ControllerResult<u64> {
        let chain_id: U64 = self.send("eth_chainId", json!([])).await?;
        Ok(chain_id.as_u64())
    }

    async fn get_header(&self, tag: BlockTag) -> ControllerResult<Option<RawBlock>> {
        self.send(GET_BLOCK_BY_NUMBER, json!([tag, false]))
            .await
            .tap_err(|e| warn!("[{}] get_header({}) failed: {}", self.chain_name, tag, e))
    }

    async fn batch_get_blocks(&self, heights: &[u64]) -> ControllerResult<Vec<Option<RawBlock>>> {
        if heights.is_empty() {
            return Ok(vec![]);
        }

        let first_id = self.next_ids(heights.len() as u64);
        let requests: Vec<JsonRpcRequest> = heights
            .iter()
            .enumerate()
            .map(|(i, height)| JsonRpcRequest {
                jsonrpc: "2.0",
                method: GET_BLOCK_BY_NUMBER,
                params: json!([BlockTag::Number(*height), false]),
                id: first_id + i as u64,
            })
            .collect();
        debug!(
            "[{}] >>> batch of {} {} starting at height {}",
            self.chain_name,
            requests.len(),
            GET_BLOCK_BY_NUMBER,
            heights[0]
        );

        let body = self.post(&requests, GET_BLOCK_BY_NUMBER).await?;
        let responses: Vec<JsonRpcResponse> = match body {
            Value::Array(_) => serde_json::from_value(body).map_err(|e| {
                ControllerError::Decode(format!("batch response entries are malformed: {}", e))
            })?,
            other => {
                // Nodes that refuse a whole batch answer with a single error object
                let response: JsonRpcResponse = serde_json::from_value(other).map_err(|e| {
                    ControllerError::Decode(format!("batch response is not an array: {}", e))
                })?;
                response.into_result("batch eth_getBlockByNumber")?;
                return Err(ControllerError::Decode(
                    "batch response is not an array".to_string(),
                ));
            }
        };

        // Servers may answer a batch in any order, entries are matched back by id
        let mut slots: Vec<Option<Option<RawBlock>>> = vec![None; heights.len()];
        let mut seen = vec![false; heights.len()];
        let mut failures = Vec::new();
        for response in responses {
            let index = response
                .id
                .and_then(|id| id.checked_sub(first_id))
                .map(|offset| offset as usize)
                .filter(|index| *index < heights.len())
                .ok_or_else(|| {
                    ControllerError::Decode(format!(
                        "batch response carries unexpected id {:?}",
                        response.id
                    ))
                })?;
            if seen[index] {
                return Err(ControllerError::Decode(format!(
                    "batch response repeats id {}",
                    first_id + index as u64
                )));
            }
            seen[index] = true;

            let height = heights[index];
            match response.into_result(GET_BLOCK_BY_NUMBER) {
                Ok(value) => {
                    let block = serde_json::from_value::<Option<RawBlock>>(value).map_err(|e| {
                        ControllerError::Decode(format!("block {} in batch: {}", height, e))
                    })?;
                    slots[index] = Some(block);
                }
                Err(e) => failures.push(format!("height {}: {}", height, e)),
            }
        }

        if !failures.is_empty() {
            warn!(
                "[{}] batch of {} blocks had {} failed calls",
                self.chain_name,
                heights.len(),
                failures.len()
            );
            return Err(ControllerError::Rpc(format!(
                "batch of {} blocks had {} failed calls: {}",
                heights.len(),
                failures.len(),
                failures.join("; ")
            )));
        }

        slots
            .into_iter()
            .zip(heights)
            .map(|(slot, height)| {
                slot.ok_or_else(|| {
                    ControllerError::Rpc(format!("batch response has no entry for height {}", height))
                })
            })
            .collect()
    }

    async fn filter_logs(&self, filter: &Filter) -> ControllerResult<Vec<Log>> {
        self.send("eth_getLogs", json!([filter]))
            .await
            .tap_err(|e| {
                warn!(
                    "[{}] eth_getLogs failed. Filter: {:?}. Error {}",
                    self.chain_name, filter, e
                )
            })
    }

    async fn call(&self, to: EthAddress, data: Bytes, tag: BlockTag) -> ControllerResult<Bytes> {
        self.send("eth_call", json!([{ "to": to, "data": data }, tag]))
            .await
            .map_err(|e| match e {
                ControllerError::Rpc(message) => ControllerError::ContractCall(message),
                other => other,
            })
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            info!("[{}] Closed RPC session to {}", self.chain_name, self.url);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
