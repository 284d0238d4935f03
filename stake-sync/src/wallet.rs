// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Signing capability handed to adapters at construction.

use crate::error::{StakeError, StakeResult};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address as EthAddress;
use std::fmt;

/// A connected account able to sign transactions.
pub trait WalletProvider: Send + Sync + fmt::Debug {
    fn address(&self) -> EthAddress;

    fn chain_id(&self) -> u64;

    fn signing_key(&self) -> &SigningKey;

    /// ethers signer bound to this wallet's chain id
    fn local_wallet(&self) -> LocalWallet {
        LocalWallet::from(self.signing_key().clone()).with_chain_id(self.chain_id())
    }

    fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key().to_bytes().into()
    }
}

/// Wallet backed by a private key held in memory.
#[derive(Clone)]
pub struct LocalKeyWallet {
    wallet: LocalWallet,
}

impl LocalKeyWallet {
    pub fn from_hex(private_key: &str, chain_id: u64) -> StakeResult<Self> {
        let trimmed = private_key.trim();
        let wallet = trimmed
            .strip_prefix("0x")
            .unwrap_or(trimmed)
            .parse::<LocalWallet>()
            .map_err(|e| StakeError::InvalidConfig(format!("Invalid private key: {}", e)))?;
        Ok(Self {
            wallet: wallet.with_chain_id(chain_id),
        })
    }

    pub fn from_env(var: &str, chain_id: u64) -> StakeResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            StakeError::InvalidConfig(format!("Environment variable {} is not set", var))
        })?;
        Self::from_hex(&key, chain_id)
    }
}

impl WalletProvider for LocalKeyWallet {
    fn address(&self) -> EthAddress {
        self.wallet.address()
    }

    fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }

    fn signing_key(&self) -> &SigningKey {
        self.wallet.signer()
    }
}

// Never print the key
impl fmt::Debug for LocalKeyWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeyWallet")
            .field("address", &self.wallet.address())
            .field("chain_id", &self.wallet.chain_id())
            .finish()
    }
}
