// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const RPC_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0, 7.5, 10.,
    15., 20., 30., 60.,
];

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    pub(crate) rpc_queries: IntCounterVec,
    pub(crate) rpc_queries_latency: HistogramVec,
    pub(crate) rpc_errors: IntCounterVec,
    pub(crate) node_connected: IntGaugeVec,
    pub(crate) last_finalized_l2_block: IntGauge,
}

impl ControllerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            rpc_queries: register_int_counter_vec_with_registry!(
                "consumer_rpc_queries",
                "Total number of JSON-RPC queries, by chain and method",
                &["chain", "method"],
                registry,
            )
            .unwrap(),
            rpc_queries_latency: register_histogram_vec_with_registry!(
                "consumer_rpc_queries_latency",
                "Latency of JSON-RPC queries, by chain and method",
                &["chain", "method"],
                RPC_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "consumer_rpc_errors",
                "Total number of failed JSON-RPC queries, by chain and error type",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            node_connected: register_int_gauge_vec_with_registry!(
                "consumer_node_connected",
                "Whether the chain node answered the last query (1) or was unreachable (0)",
                &["chain"],
                registry,
            )
            .unwrap(),
            last_finalized_l2_block: register_int_gauge_with_registry!(
                "consumer_last_finalized_l2_block",
                "Latest L2 block height committed to L1 by the output oracle",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
