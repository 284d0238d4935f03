// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::network::{Network, SEPOLIA_CHAIN_ID};
use crate::types::BackendKind;
use crate::wallet::{LocalKeyWallet, WalletProvider};
use anyhow::anyhow;
use ethers::types::Address as EthAddress;
use serde::{Deserialize, Serialize};
use stake_sync_config::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_PRIVATE_KEY_ENV: &str = "STAKE_SYNC_PRIVATE_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WalletConfig {
    // Hex encoded secp256k1 key. Prefer `private-key-env` outside of tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    // Environment variable holding the key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StakeSyncConfig {
    // Chain the wallet is expected to be on. Unknown ids use Sepolia defaults.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default)]
    pub pool_id: u64,
    // Overrides the network's default RPC url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    // Overrides the network's staking contract
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stake_contract: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    // Concurrent requests allowed through the metered ethers transport
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletConfig>,
}

fn default_chain_id() -> u64 {
    SEPOLIA_CHAIN_ID
}

fn default_backend() -> BackendKind {
    BackendKind::Ethers
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent_requests() -> usize {
    4
}

impl Default for StakeSyncConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            backend: default_backend(),
            pool_id: 0,
            rpc_url: None,
            stake_contract: None,
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            wallet: None,
        }
    }
}

impl Config for StakeSyncConfig {}

impl StakeSyncConfig {
    /// Config written by `create-config-template`.
    pub fn template() -> Self {
        Self {
            wallet: Some(WalletConfig {
                private_key: None,
                private_key_env: Some(DEFAULT_PRIVATE_KEY_ENV.to_string()),
            }),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<ResolvedConfig> {
        info!("Starting config validation");
        let network = Network::from_chain_id(self.chain_id);
        if network.chain_id() != self.chain_id {
            warn!(
                "Chain id {} is not a known network, using {} defaults",
                self.chain_id, network
            );
        }

        let rpc_url = self
            .rpc_url
            .as_deref()
            .unwrap_or_else(|| network.default_rpc_url());
        let rpc_url =
            Url::parse(rpc_url).map_err(|e| anyhow!("Invalid rpc-url '{}': {}", rpc_url, e))?;

        let stake_contract = match &self.stake_contract {
            Some(address) => address
                .parse::<EthAddress>()
                .map_err(|e| anyhow!("Invalid stake-contract '{}': {}", address, e))?,
            None => network.stake_contract(),
        };
        if stake_contract == EthAddress::zero() {
            return Err(anyhow!(
                "No staking contract deployed on {}; set stake-contract explicitly",
                network
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll-interval-ms must be greater than zero"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(anyhow!("max-concurrent-requests must be greater than zero"));
        }

        let wallet = self.load_wallet()?;
        match &wallet {
            Some(w) => info!("Loaded signer {:?}", w.address()),
            None => info!("No wallet configured, running read-only"),
        }

        info!("Config validation complete");
        Ok(ResolvedConfig {
            network,
            chain_id: self.chain_id,
            backend: self.backend,
            pool_id: self.pool_id,
            rpc_url,
            stake_contract,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            max_concurrent_requests: self.max_concurrent_requests,
            wallet,
        })
    }

    fn load_wallet(&self) -> anyhow::Result<Option<Arc<dyn WalletProvider>>> {
        let Some(wallet) = &self.wallet else {
            return Ok(None);
        };
        let loaded = match (&wallet.private_key, &wallet.private_key_env) {
            (Some(key), _) => LocalKeyWallet::from_hex(key, self.chain_id)?,
            (None, Some(var)) => match std::env::var(var) {
                Ok(key) => LocalKeyWallet::from_hex(&key, self.chain_id)?,
                Err(_) => {
                    warn!("Environment variable {} is not set, running read-only", var);
                    return Ok(None);
                }
            },
            (None, None) => return Ok(None),
        };
        Ok(Some(Arc::new(loaded)))
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub network: Network,
    pub chain_id: u64,
    pub backend: BackendKind,
    pub pool_id: u64,
    pub rpc_url: Url,
    pub stake_contract: EthAddress,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub wallet: Option<Arc<dyn WalletProvider>>,
}

impl ResolvedConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_pool_id(mut self, pool_id: u64) -> Self {
        self.pool_id = pool_id;
        self
    }
}
