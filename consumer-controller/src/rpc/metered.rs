// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Metered wrapper for chain sessions that tracks query counts, latencies and failures.

use super::ChainSession;
use crate::error::{ControllerError, ControllerResult};
use crate::metrics::ControllerMetrics;
use crate::types::{BlockTag, RawBlock};
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, Bytes, Filter, Log};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct MeteredSession<S> {
    inner: S,
    metrics: Arc<ControllerMetrics>,
}

impl<S: ChainSession> MeteredSession<S> {
    pub fn new(inner: S, metrics: Arc<ControllerMetrics>) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn record_query(&self, method: &str) {
        self.metrics
            .rpc_queries
            .with_label_values(&[self.inner.chain_name(), method])
            .inc();
    }

    fn start_timer(&self, method: &str) -> prometheus::HistogramTimer {
        self.metrics
            .rpc_queries_latency
            .with_label_values(&[self.inner.chain_name(), method])
            .start_timer()
    }

    fn observe<T>(&self, result: ControllerResult<T>) -> ControllerResult<T> {
        let chain = self.inner.chain_name();
        match &result {
            Ok(_) => self.metrics.node_connected.with_label_values(&[chain]).set(1),
            Err(e) => {
                self.metrics
                    .rpc_errors
                    .with_label_values(&[chain, e.error_type()])
                    .inc();
                // A revert or a malformed answer still means the node is reachable
                let reachable = !matches!(
                    e,
                    ControllerError::Connection(_)
                        | ControllerError::ConnectionClosed(_)
                        | ControllerError::Timeout(_)
                );
                self.metrics
                    .node_connected
                    .with_label_values(&[chain])
                    .set(reachable as i64);
            }
        }
        result
    }
}

#[async_trait]
impl<S: ChainSession> ChainSession for MeteredSession<S> {
    fn chain_name(&self) -> &str {
        self.inner.chain_name()
    }

    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn chain_id(&self) -> ControllerResult<u64> {
        self.record_query("eth_chainId");
        let _timer = self.start_timer("eth_chainId");
        self.observe(self.inner.chain_id().await)
    }

    async fn get_header(&self, tag: BlockTag) -> ControllerResult<Option<RawBlock>> {
        self.record_query("eth_getBlockByNumber");
        let _timer = self.start_timer("eth_getBlockByNumber");
        self.observe(self.inner.get_header(tag).await)
    }

    async fn batch_get_blocks(&self, heights: &[u64]) -> ControllerResult<Vec<Option<RawBlock>>> {
        self.record_query("eth_getBlockByNumber_batch");
        let _timer = self.start_timer("eth_getBlockByNumber_batch");
        self.observe(self.inner.batch_get_blocks(heights).await)
    }

    async fn filter_logs(&self, filter: &Filter) -> ControllerResult<Vec<Log>> {
        self.record_query("eth_getLogs");
        let _timer = self.start_timer("eth_getLogs");
        self.observe(self.inner.filter_logs(filter).await)
    }

    async fn call(&self, to: EthAddress, data: Bytes, tag: BlockTag) -> ControllerResult<Bytes> {
        self.record_query("eth_call");
        let _timer = self.start_timer("eth_call");
        self.observe(self.inner.call(to, data, tag).await)
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
