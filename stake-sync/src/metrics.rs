// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, HistogramVec,
    IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10., 15., 20., 25.,
    30., 40., 50., 60., 90., 120., 180., 240., 300.,
];

#[derive(Clone, Debug)]
pub struct StakeSyncMetrics {
    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_node_connected: IntGauge,

    pub(crate) refresh_ok: IntCounterVec,
    pub(crate) refresh_failed: IntCounterVec,
    pub(crate) last_synced_block: IntGaugeVec,
    pub(crate) mounted_syncs: IntGauge,

    pub(crate) actions_submitted: IntCounterVec,
    pub(crate) actions_confirmed: IntCounterVec,
    pub(crate) actions_failed: IntCounterVec,
    pub(crate) action_latency: HistogramVec,
}

impl StakeSyncMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "stake_sync_eth_rpc_queries",
                "Total number of queries issued to eth provider, by request type",
                &["type"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "stake_sync_eth_rpc_queries_latency",
                "Latency of queries issued to eth provider, by request type",
                &["type"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "stake_sync_eth_node_connected",
                "Whether the last eth provider request succeeded (1) or failed (0)",
                registry,
            )
            .unwrap(),
            refresh_ok: register_int_counter_vec_with_registry!(
                "stake_sync_refresh_ok",
                "Total number of successful snapshot refreshes, by backend",
                &["backend"],
                registry,
            )
            .unwrap(),
            refresh_failed: register_int_counter_vec_with_registry!(
                "stake_sync_refresh_failed",
                "Total number of failed snapshot refreshes, by backend and error type",
                &["backend", "error_type"],
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_vec_with_registry!(
                "stake_sync_last_synced_block",
                "Block height of the last published snapshot, by backend",
                &["backend"],
                registry,
            )
            .unwrap(),
            mounted_syncs: register_int_gauge_with_registry!(
                "stake_sync_mounted_syncs",
                "Number of sync instances currently polling",
                registry,
            )
            .unwrap(),
            actions_submitted: register_int_counter_vec_with_registry!(
                "stake_sync_actions_submitted",
                "Total number of transactions submitted, by backend and action",
                &["backend", "action"],
                registry,
            )
            .unwrap(),
            actions_confirmed: register_int_counter_vec_with_registry!(
                "stake_sync_actions_confirmed",
                "Total number of transactions confirmed, by backend and action",
                &["backend", "action"],
                registry,
            )
            .unwrap(),
            actions_failed: register_int_counter_vec_with_registry!(
                "stake_sync_actions_failed",
                "Total number of failed actions, by backend, action and error type",
                &["backend", "action", "error_type"],
                registry,
            )
            .unwrap(),
            action_latency: register_histogram_vec_with_registry!(
                "stake_sync_action_latency",
                "Latency from submission to confirmation, by action",
                &["action"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
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
