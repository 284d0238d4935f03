// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::StakeSyncMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::{ParseError, Url};

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// ethers HTTP transport that records per-method metrics and caps concurrency.
#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    metrics: Arc<StakeSyncMetrics>,
    semaphore: Arc<Semaphore>,
}

fn is_rate_limited(error: &HttpClientError) -> bool {
    // Some providers answer 429 with a body that fails JSON-RPC decoding
    let error_str = format!("{:?}", error).to_lowercase();
    error_str.contains("rate limit")
        || error_str.contains("429")
        || error_str.contains("too many requests")
        || error_str.contains("-32005")
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is owned by self and never closed
        let _permit = self.semaphore.acquire().await.ok();

        self.metrics
            .eth_rpc_queries
            .with_label_values(&[method])
            .inc();
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();

        let mut result = self.inner.request(method, &params).await;
        let mut retry_count = 0;
        while retry_count < MAX_RATE_LIMIT_RETRIES {
            match &result {
                Err(e) if is_rate_limited(e) => {}
                _ => break,
            }
            let backoff_duration = Duration::from_secs(1 << retry_count);
            tracing::warn!(
                "Rate limit error detected, retrying after {:?} (attempt {}/{})",
                backoff_duration,
                retry_count + 1,
                MAX_RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(backoff_duration).await;
            result = self.inner.request(method, &params).await;
            retry_count += 1;
        }

        match &result {
            Ok(_) => self.metrics.eth_node_connected.set(1),
            Err(_) => self.metrics.eth_node_connected.set(0),
        }
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(url: impl Into<Url>, metrics: Arc<StakeSyncMetrics>, max_concurrent: usize) -> Self {
        Self {
            inner: Http::new(url),
            metrics,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    metrics: Arc<StakeSyncMetrics>,
    max_concurrent: usize,
) -> Result<Provider<MeteredEthHttpProvider>, ParseError> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, metrics, max_concurrent);
    Ok(Provider::new(http_provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::Middleware;
    use prometheus::Registry;

    #[tokio::test]
    async fn test_metered_eth_provider() {
        let metrics = Arc::new(StakeSyncMetrics::new(&Registry::new()));
        let provider =
            new_metered_eth_provider("http://localhost:9876", metrics.clone(), 2).unwrap();

        assert_eq!(
            metrics
                .eth_rpc_queries
                .get_metric_with_label_values(&["eth_blockNumber"])
                .unwrap()
                .get(),
            0
        );

        provider.get_block_number().await.unwrap_err(); // nothing listens on this port

        assert_eq!(
            metrics
                .eth_rpc_queries
                .get_metric_with_label_values(&["eth_blockNumber"])
                .unwrap()
                .get(),
            1
        );
        assert_eq!(
            metrics
                .eth_rpc_queries_latency
                .get_metric_with_label_values(&["eth_blockNumber"])
                .unwrap()
                .get_sample_count(),
            1
        );
        assert_eq!(metrics.eth_node_connected.get(), 0);
    }

    #[test]
    fn test_invalid_url() {
        let metrics = Arc::new(StakeSyncMetrics::new_for_testing());
        assert!(new_metered_eth_provider("not a url", metrics, 1).is_err());
    }
}
