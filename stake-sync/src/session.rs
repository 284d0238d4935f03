// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Staking page orchestration: which backend, which pool, which account.
//!
//! Changing any of them unmounts the current [`StakeSync`] and mounts a
//! fresh one, so no state carries over between pools or backends.

use crate::adapter::{build_adapter, StakeAdapter};
use crate::assets::AssetClient;
use crate::config::ResolvedConfig;
use crate::error::StakeResult;
use crate::metrics::StakeSyncMetrics;
use crate::sync::StakeSync;
use crate::types::{AccountContext, BackendKind, StakeToken, StakingOverview, TokenMetadata};
use std::sync::Arc;
use tap::TapFallible;
use tracing::{info, warn};

/// Builds the adapter for a backend kind.
pub type AdapterFactory =
    Arc<dyn Fn(BackendKind) -> StakeResult<Arc<dyn StakeAdapter>> + Send + Sync>;

pub struct StakeSession {
    config: ResolvedConfig,
    metrics: Arc<StakeSyncMetrics>,
    factory: AdapterFactory,
    backend: BackendKind,
    pool_id: u64,
    account: AccountContext,
    adapter: Arc<dyn StakeAdapter>,
    sync: Option<StakeSync>,
}

impl StakeSession {
    pub fn new(config: ResolvedConfig, metrics: Arc<StakeSyncMetrics>) -> StakeResult<Self> {
        let factory_config = config.clone();
        let factory_metrics = metrics.clone();
        let factory: AdapterFactory =
            Arc::new(move |kind| build_adapter(kind, &factory_config, factory_metrics.clone()));
        Self::with_factory(config, metrics, factory)
    }

    pub fn with_factory(
        config: ResolvedConfig,
        metrics: Arc<StakeSyncMetrics>,
        factory: AdapterFactory,
    ) -> StakeResult<Self> {
        let account = match &config.wallet {
            Some(wallet) => AccountContext::connected(wallet.address(), config.chain_id),
            None => AccountContext::disconnected(config.chain_id),
        };
        let adapter = factory(config.backend)?;
        Ok(Self {
            backend: config.backend,
            pool_id: config.pool_id,
            config,
            metrics,
            factory,
            account,
            adapter,
            sync: None,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn account(&self) -> AccountContext {
        self.account
    }

    pub fn adapter(&self) -> Arc<dyn StakeAdapter> {
        self.adapter.clone()
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The mounted sync, if any
    pub fn sync(&self) -> Option<&StakeSync> {
        self.sync.as_ref()
    }

    /// Whether `pool_id` stakes the native asset, from its pool record
    pub async fn resolve_token(&self, pool_id: u64) -> StakeResult<StakeToken> {
        Ok(self.adapter.read_pool(pool_id).await?.stake_token)
    }

    pub async fn overview(&self) -> StakeResult<StakingOverview> {
        self.adapter.read_overview().await
    }

    pub async fn token_metadata(&self, token: StakeToken) -> StakeResult<TokenMetadata> {
        self.adapter.read_token_metadata(token).await
    }

    /// Pool-independent asset operations on the current backend and account
    pub fn assets(&self) -> AssetClient {
        AssetClient::new(self.adapter.clone(), self.account, self.metrics.clone())
    }

    /// Mounts a sync for the current backend, pool and account, replacing any
    /// previous one.
    pub async fn mount(&mut self) -> StakeResult<&StakeSync> {
        self.remount(self.adapter.clone(), self.backend, self.pool_id, self.account)
            .await
    }

    /// Resolves the pool token on `adapter` and only then swaps the mounted
    /// sync. On error the current sync and selection stay as they were.
    async fn remount(
        &mut self,
        adapter: Arc<dyn StakeAdapter>,
        backend: BackendKind,
        pool_id: u64,
        account: AccountContext,
    ) -> StakeResult<&StakeSync> {
        let token = adapter
            .read_pool(pool_id)
            .await
            .tap_err(|e| {
                warn!(
                    "Keeping current sync, pool {} unavailable on {}: {}",
                    pool_id, backend, e
                )
            })?
            .stake_token;
        self.unmount();
        self.adapter = adapter;
        self.backend = backend;
        self.pool_id = pool_id;
        self.account = account;
        info!(
            "Mounting {} sync of pool {} ({:?}) for {:?}",
            backend,
            pool_id,
            token,
            account.active_address()
        );
        let sync = StakeSync::mount(
            self.adapter.clone(),
            pool_id,
            account,
            token,
            self.config.poll_interval,
            self.metrics.clone(),
        );
        Ok(self.sync.insert(sync))
    }

    pub fn unmount(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.unmount();
        }
    }

    pub async fn switch_backend(&mut self, backend: BackendKind) -> StakeResult<&StakeSync> {
        let adapter = if backend == self.backend {
            self.adapter.clone()
        } else {
            (self.factory)(backend)?
        };
        self.remount(adapter, backend, self.pool_id, self.account)
            .await
    }

    pub async fn select_pool(&mut self, pool_id: u64) -> StakeResult<&StakeSync> {
        self.remount(self.adapter.clone(), self.backend, pool_id, self.account)
            .await
    }

    pub async fn set_account(&mut self, account: AccountContext) -> StakeResult<&StakeSync> {
        self.remount(self.adapter.clone(), self.backend, self.pool_id, account)
            .await
    }
}
