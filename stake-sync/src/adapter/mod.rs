// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! One data adapter per EVM client library family.
//!
//! Every adapter speaks to the same staking contract and exposes the same
//! reads and writes. Apart from [`batch_rpc`], which pins a whole refresh to
//! one block, reads are independent calls that may observe different blocks.

use crate::config::ResolvedConfig;
use crate::error::{ConfirmationFailure, StakeError, StakeResult};
use crate::events::{decode_stake_events, TransferEvent};
use crate::metrics::StakeSyncMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::{
    BackendKind, ConfirmedTx, PoolSnapshot, StakeToken, StakingOverview, TokenInfo, TokenMetadata,
    TxHandle, UserPosition, WithdrawRequestState,
};
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, Log, TxHash, U256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod alloy_backend;
pub mod batch_rpc;
pub mod ethers_backend;

pub use alloy_backend::AlloyStakeAdapter;
pub use batch_rpc::BatchRpcStakeAdapter;
pub use ethers_backend::EthersStakeAdapter;

/// Raw tuple returned by `pool(pid)`.
pub(crate) type PoolRecord = (EthAddress, U256, U256, U256, U256, U256, U256);

/// All reads one refresh needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReads {
    pub pool: PoolSnapshot,
    pub position: UserPosition,
    pub withdrawal: WithdrawRequestState,
    pub block_height: u64,
}

#[async_trait]
pub trait StakeAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn stake_contract(&self) -> EthAddress;

    /// Address of the injected wallet, if any
    fn signer_address(&self) -> Option<EthAddress>;

    async fn read_pool(&self, pool_id: u64) -> StakeResult<PoolSnapshot>;

    async fn read_user_position(
        &self,
        pool_id: u64,
        account: EthAddress,
        token: StakeToken,
    ) -> StakeResult<UserPosition>;

    async fn read_withdraw_state(
        &self,
        pool_id: u64,
        account: EthAddress,
    ) -> StakeResult<WithdrawRequestState>;

    async fn read_block_height(&self) -> StakeResult<u64>;

    async fn read_chain_id(&self) -> StakeResult<u64>;

    async fn read_overview(&self) -> StakeResult<StakingOverview>;

    async fn read_token_metadata(&self, token: StakeToken) -> StakeResult<TokenMetadata>;

    /// Native balance of any address
    async fn read_native_balance(&self, address: EthAddress) -> StakeResult<U256>;

    /// ERC-20 details of `token`, with the balance of `holder` when given.
    async fn read_token_info(
        &self,
        token: EthAddress,
        holder: Option<EthAddress>,
    ) -> StakeResult<TokenInfo>;

    /// `Transfer` logs emitted by `token` between two blocks, both inclusive.
    async fn read_transfer_events(
        &self,
        token: EthAddress,
        from_block: u64,
        to_block: u64,
    ) -> StakeResult<Vec<TransferEvent>>;

    /// Reads pool, position, withdraw state and block height concurrently.
    /// Without an account the user-specific parts are left at zero.
    async fn read_refresh(
        &self,
        pool_id: u64,
        account: Option<EthAddress>,
        token: StakeToken,
    ) -> StakeResult<RefreshReads> {
        match account {
            Some(account) => {
                let (pool, position, withdrawal, block_height) = tokio::try_join!(
                    self.read_pool(pool_id),
                    self.read_user_position(pool_id, account, token),
                    self.read_withdraw_state(pool_id, account),
                    self.read_block_height(),
                )?;
                Ok(RefreshReads {
                    pool,
                    position,
                    withdrawal,
                    block_height,
                })
            }
            None => {
                let (pool, block_height) =
                    tokio::try_join!(self.read_pool(pool_id), self.read_block_height())?;
                Ok(RefreshReads {
                    pool,
                    position: UserPosition::default(),
                    withdrawal: WithdrawRequestState::default(),
                    block_height,
                })
            }
        }
    }

    async fn submit_approve(
        &self,
        token: EthAddress,
        spender: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle>;

    /// `depositETH` with `amount` attached as value
    async fn submit_native_deposit(&self, amount: U256) -> StakeResult<TxHandle>;

    async fn submit_token_deposit(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle>;

    /// Routes to the native or the token deposit according to `token`.
    async fn submit_stake(
        &self,
        pool_id: u64,
        amount: U256,
        token: StakeToken,
    ) -> StakeResult<TxHandle> {
        match token {
            StakeToken::Native => self.submit_native_deposit(amount).await,
            StakeToken::Erc20(_) => self.submit_token_deposit(pool_id, amount).await,
        }
    }

    async fn submit_unstake(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle>;

    async fn submit_claim(&self, pool_id: u64) -> StakeResult<TxHandle>;

    async fn submit_withdraw(&self, pool_id: u64) -> StakeResult<TxHandle>;

    /// Plain value transfer from the wallet to `to`
    async fn submit_native_transfer(&self, to: EthAddress, amount: U256) -> StakeResult<TxHandle>;

    async fn submit_token_transfer(
        &self,
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle>;

    /// WETH `deposit()` with `amount` attached as value
    async fn submit_wrap(&self, weth: EthAddress, amount: U256) -> StakeResult<TxHandle>;

    async fn await_confirmation(&self, handle: &TxHandle) -> StakeResult<ConfirmedTx>;
}

/// Builds the adapter for `kind`; the one place backends are selected.
pub fn build_adapter(
    kind: BackendKind,
    config: &ResolvedConfig,
    metrics: Arc<StakeSyncMetrics>,
) -> StakeResult<Arc<dyn StakeAdapter>> {
    let adapter: Arc<dyn StakeAdapter> = match kind {
        BackendKind::Ethers => Arc::new(EthersStakeAdapter::new(config, metrics)?),
        BackendKind::BatchRpc => Arc::new(BatchRpcStakeAdapter::new(config, metrics)?),
        BackendKind::Alloy => Arc::new(AlloyStakeAdapter::new(config, metrics)?),
    };
    debug!(
        "Built {} adapter for stake contract {:?}",
        kind,
        adapter.stake_contract()
    );
    Ok(adapter)
}

pub(crate) fn pool_from_record(pool_id: u64, record: PoolRecord) -> PoolSnapshot {
    let (
        stake_token,
        pool_weight,
        last_reward_block,
        acc_reward_per_share,
        total_staked,
        min_deposit,
        unstake_lock_blocks,
    ) = record;
    PoolSnapshot {
        pool_id,
        stake_token: StakeToken::from_address(stake_token),
        pool_weight,
        last_reward_block,
        acc_reward_per_share,
        total_staked,
        min_deposit,
        unstake_lock_blocks,
    }
}

pub(crate) fn u256_to_u64(value: U256, what: &str) -> StakeResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(StakeError::InvalidResponse(format!(
            "{} {} does not fit in u64",
            what, value
        )));
    }
    Ok(value.as_u64())
}

/// Turns a mined receipt into a [`ConfirmedTx`], failing on a zero status.
pub(crate) fn confirmed_tx(
    stake_contract: EthAddress,
    tx_hash: TxHash,
    success: bool,
    block_number: Option<u64>,
    gas_used: Option<U256>,
    logs: &[Log],
) -> StakeResult<ConfirmedTx> {
    if !success {
        return Err(StakeError::ConfirmationFailed {
            tx_hash,
            reason: ConfirmationFailure::Reverted,
        });
    }
    let block_number = block_number.ok_or_else(|| {
        StakeError::InvalidResponse(format!("Receipt of {:?} has no block number", tx_hash))
    })?;
    Ok(ConfirmedTx {
        tx_hash,
        block_number,
        gas_used,
        events: decode_stake_events(stake_contract, logs),
    })
}

/// Polls `fetch` until it yields a receipt or `timeout` elapses.
pub(crate) async fn poll_receipt<R, F, Fut>(
    tx_hash: TxHash,
    timeout: Duration,
    fetch: F,
) -> StakeResult<R>
where
    R: Send,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = StakeResult<Option<R>>> + Send,
{
    let result = retry_with_max_elapsed_time!(
        async {
            match fetch().await {
                Ok(Some(receipt)) => Ok(receipt),
                Ok(None) => Err(StakeError::TransientProviderError(format!(
                    "Receipt of {:?} not available yet",
                    tx_hash
                ))),
                Err(e) => Err(e),
            }
        },
        timeout
    );
    match result {
        Ok(inner) => inner,
        Err(e) => {
            warn!(
                "Gave up waiting for receipt of {:?} after {:?}: {}",
                tx_hash, timeout, e
            );
            Err(StakeError::ConfirmationFailed {
                tx_hash,
                reason: ConfirmationFailure::TimedOut,
            })
        }
    }
}

/// A timed out transaction the node no longer knows about was dropped.
pub(crate) fn reclassify_timeout(
    error: StakeError,
    known_to_node: StakeResult<bool>,
) -> StakeError {
    match (error, known_to_node) {
        (
            StakeError::ConfirmationFailed {
                tx_hash,
                reason: ConfirmationFailure::TimedOut,
            },
            Ok(false),
        ) => StakeError::ConfirmationFailed {
            tx_hash,
            reason: ConfirmationFailure::Dropped,
        },
        (error, _) => error,
    }
}
