// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{StakeError, StakeResult};
use crate::events::StakeEvent;
use ethers::types::{Address as EthAddress, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The all-zero address the staking contract uses for the native asset pool.
pub const NATIVE_TOKEN_SENTINEL: EthAddress = EthAddress::zero();

/// Symbol and decimals reported for the native asset pool.
pub const NATIVE_SYMBOL: &str = "ETH";
pub const NATIVE_DECIMALS: u8 = 18;

/// Which client library family an adapter is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// ethers-rs typed contract bindings
    Ethers,
    /// Raw JSON-RPC batches with queries declared by function name
    BatchRpc,
    /// alloy `sol!` bindings
    Alloy,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Ethers,
        BackendKind::BatchRpc,
        BackendKind::Alloy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ethers => "ethers",
            BackendKind::BatchRpc => "batch-rpc",
            BackendKind::Alloy => "alloy",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethers" => Ok(BackendKind::Ethers),
            "batch-rpc" | "batch_rpc" | "batch" => Ok(BackendKind::BatchRpc),
            "alloy" => Ok(BackendKind::Alloy),
            other => Err(StakeError::InvalidConfig(format!(
                "Unknown backend '{}', expected one of ethers, batch-rpc, alloy",
                other
            ))),
        }
    }
}

/// The asset a pool accepts. Decided once per pool and never re-derived per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeToken {
    Native,
    Erc20(EthAddress),
}

impl StakeToken {
    pub fn from_address(address: EthAddress) -> Self {
        if address == NATIVE_TOKEN_SENTINEL {
            StakeToken::Native
        } else {
            StakeToken::Erc20(address)
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, StakeToken::Native)
    }

    pub fn address(&self) -> EthAddress {
        match self {
            StakeToken::Native => NATIVE_TOKEN_SENTINEL,
            StakeToken::Erc20(address) => *address,
        }
    }

    pub fn erc20_address(&self) -> Option<EthAddress> {
        match self {
            StakeToken::Native => None,
            StakeToken::Erc20(address) => Some(*address),
        }
    }
}

/// Wallet connection as seen by a sync instance. Read-only to the sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountContext {
    pub address: Option<EthAddress>,
    pub chain_id: u64,
    pub connected: bool,
}

impl AccountContext {
    pub fn connected(address: EthAddress, chain_id: u64) -> Self {
        Self {
            address: Some(address),
            chain_id,
            connected: true,
        }
    }

    pub fn disconnected(chain_id: u64) -> Self {
        Self {
            address: None,
            chain_id,
            connected: false,
        }
    }

    /// The account address, if the wallet is connected
    pub fn active_address(&self) -> Option<EthAddress> {
        if self.connected {
            self.address
        } else {
            None
        }
    }
}

/// One read of `pool(pid)`. All seven fields come from the same call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub pool_id: u64,
    pub stake_token: StakeToken,
    pub pool_weight: U256,
    pub last_reward_block: U256,
    /// Fixed-point accumulated reward per staked unit
    pub acc_reward_per_share: U256,
    pub total_staked: U256,
    pub min_deposit: U256,
    pub unstake_lock_blocks: U256,
}

impl PoolSnapshot {
    pub fn is_native(&self) -> bool {
        self.stake_token.is_native()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserPosition {
    pub staked_balance: U256,
    pub wallet_balance: U256,
    /// Always zero for the native pool
    pub allowance: U256,
    pub pending_reward: U256,
}

/// Result of `withdrawAmount(pid, user)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WithdrawRequestState {
    requested_amount: U256,
    unlocked_amount: U256,
}

impl WithdrawRequestState {
    pub fn new(requested_amount: U256, unlocked_amount: U256) -> StakeResult<Self> {
        if unlocked_amount > requested_amount {
            return Err(StakeError::InvalidWithdrawState {
                requested: requested_amount,
                unlocked: unlocked_amount,
            });
        }
        Ok(Self {
            requested_amount,
            unlocked_amount,
        })
    }

    pub fn requested_amount(&self) -> U256 {
        self.requested_amount
    }

    pub fn unlocked_amount(&self) -> U256 {
        self.unlocked_amount
    }

    /// Amount still inside the unstake lock window
    pub fn locked_amount(&self) -> U256 {
        self.requested_amount - self.unlocked_amount
    }

    pub fn is_withdrawable(&self) -> bool {
        !self.unlocked_amount.is_zero()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainCursor {
    pub current_block_height: u64,
}

/// Everything a sync instance publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub account: AccountContext,
    /// None until the first successful refresh
    pub pool: Option<PoolSnapshot>,
    pub position: UserPosition,
    pub withdrawal: WithdrawRequestState,
    pub cursor: ChainCursor,
    pub loading: bool,
}

impl SyncSnapshot {
    pub fn empty(account: AccountContext) -> Self {
        Self {
            account,
            ..Default::default()
        }
    }

    pub fn is_populated(&self) -> bool {
        self.pool.is_some()
    }

    /// Whether an ERC-20 stake of `amount` needs an approve first
    pub fn needs_approval(&self, token: StakeToken, amount: U256) -> bool {
        !token.is_native() && self.position.allowance < amount
    }

    /// Block height at which a fresh unstake request would unlock
    pub fn unlock_block_estimate(&self) -> Option<u64> {
        let pool = self.pool.as_ref()?;
        let lock = if pool.unstake_lock_blocks > U256::from(u64::MAX) {
            u64::MAX
        } else {
            pool.unstake_lock_blocks.as_u64()
        };
        Some(self.cursor.current_block_height.saturating_add(lock))
    }
}

/// Contract-wide parameters shown on the staking page header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakingOverview {
    pub pool_count: u64,
    pub start_block: U256,
    pub end_block: U256,
    pub reward_per_block: U256,
    pub total_pool_weight: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    pub fn native() -> Self {
        Self {
            symbol: NATIVE_SYMBOL.to_string(),
            decimals: NATIVE_DECIMALS,
        }
    }
}

/// ERC-20 token details, optionally with one holder's balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: EthAddress,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
    pub holder_balance: Option<U256>,
}

impl TokenInfo {
    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            symbol: self.symbol.clone(),
            decimals: self.decimals,
        }
    }
}

/// A submitted, not yet confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle {
    pub tx_hash: TxHash,
    pub backend: BackendKind,
}

/// A transaction with a successful receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: Option<U256>,
    pub events: Vec<StakeEvent>,
}

/// Mutating operations a sync instance or an asset client exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeAction {
    Approve,
    Stake,
    Unstake,
    Claim,
    Withdraw,
    /// Plain value transfer to another address
    NativeTransfer,
    /// ERC-20 `transfer`
    TokenTransfer,
    /// WETH `deposit()`
    Wrap,
}

impl StakeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeAction::Approve => "approve",
            StakeAction::Stake => "stake",
            StakeAction::Unstake => "unstake",
            StakeAction::Claim => "claim",
            StakeAction::Withdraw => "withdraw",
            StakeAction::NativeTransfer => "send",
            StakeAction::TokenTransfer => "transfer",
            StakeAction::Wrap => "wrap",
        }
    }
}
