// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wallet operations that are not tied to a pool: balances, token info,
//! plain transfers, WETH wrapping and following ERC-20 `Transfer` logs.

use crate::adapter::StakeAdapter;
use crate::error::{StakeError, StakeResult};
use crate::events::TransferEvent;
use crate::metrics::StakeSyncMetrics;
use crate::sync::preflight;
use crate::types::{AccountContext, ConfirmedTx, StakeAction, TokenInfo, TxHandle};
use ethers::types::{Address as EthAddress, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TRANSFER_CHANNEL_SIZE: usize = 1000;

enum AssetRequest {
    Send {
        to: EthAddress,
        amount: U256,
    },
    Transfer {
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    },
    Wrap {
        weth: EthAddress,
        amount: U256,
    },
}

impl AssetRequest {
    fn action(&self) -> StakeAction {
        match self {
            AssetRequest::Send { .. } => StakeAction::NativeTransfer,
            AssetRequest::Transfer { .. } => StakeAction::TokenTransfer,
            AssetRequest::Wrap { .. } => StakeAction::Wrap,
        }
    }

    fn amount(&self) -> U256 {
        match self {
            AssetRequest::Send { amount, .. }
            | AssetRequest::Transfer { amount, .. }
            | AssetRequest::Wrap { amount, .. } => *amount,
        }
    }
}

/// Asset operations for one account over one adapter.
pub struct AssetClient {
    adapter: Arc<dyn StakeAdapter>,
    account: AccountContext,
    metrics: Arc<StakeSyncMetrics>,
}

impl AssetClient {
    pub fn new(
        adapter: Arc<dyn StakeAdapter>,
        account: AccountContext,
        metrics: Arc<StakeSyncMetrics>,
    ) -> Self {
        Self {
            adapter,
            account,
            metrics,
        }
    }

    pub fn account(&self) -> AccountContext {
        self.account
    }

    /// Native balance of `address`, or of the connected account when `None`.
    pub async fn native_balance(&self, address: Option<EthAddress>) -> StakeResult<U256> {
        let address = address
            .or(self.account.active_address())
            .ok_or(StakeError::AccountNotConnected)?;
        self.adapter.read_native_balance(address).await
    }

    /// Token metadata plus the connected account's balance, if any.
    pub async fn token_info(&self, token: EthAddress) -> StakeResult<TokenInfo> {
        self.adapter
            .read_token_info(token, self.account.active_address())
            .await
    }

    pub async fn transfer_events(
        &self,
        token: EthAddress,
        from_block: u64,
        to_block: u64,
    ) -> StakeResult<Vec<TransferEvent>> {
        self.adapter
            .read_transfer_events(token, from_block, to_block)
            .await
    }

    pub async fn send_native(&self, to: EthAddress, amount: U256) -> StakeResult<ConfirmedTx> {
        self.execute(AssetRequest::Send { to, amount }).await
    }

    pub async fn transfer_token(
        &self,
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    ) -> StakeResult<ConfirmedTx> {
        self.execute(AssetRequest::Transfer { token, to, amount }).await
    }

    /// Wraps `amount` of the native asset by calling `deposit()` on `weth`.
    pub async fn wrap(&self, weth: EthAddress, amount: U256) -> StakeResult<ConfirmedTx> {
        self.execute(AssetRequest::Wrap { weth, amount }).await
    }

    /// Streams `Transfer` logs of `token` until `cancel` fires or the
    /// receiver is dropped. Without `from_block` only new blocks are followed.
    pub fn follow_transfers(
        &self,
        token: EthAddress,
        from_block: Option<u64>,
        config: FollowConfig,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(TRANSFER_CHANNEL_SIZE);
        let handle = tokio::spawn(run_transfer_follower(
            self.adapter.clone(),
            token,
            from_block,
            config,
            tx,
            cancel,
        ));
        (handle, rx)
    }

    /// Spendable balance the request draws from.
    async fn available(&self, request: &AssetRequest, owner: EthAddress) -> StakeResult<U256> {
        match request {
            AssetRequest::Send { .. } | AssetRequest::Wrap { .. } => {
                self.adapter.read_native_balance(owner).await
            }
            AssetRequest::Transfer { token, .. } => Ok(self
                .adapter
                .read_token_info(*token, Some(owner))
                .await?
                .holder_balance
                .unwrap_or_default()),
        }
    }

    async fn submit(&self, request: &AssetRequest) -> StakeResult<TxHandle> {
        match request {
            AssetRequest::Send { to, amount } => {
                self.adapter.submit_native_transfer(*to, *amount).await
            }
            AssetRequest::Transfer { token, to, amount } => {
                self.adapter.submit_token_transfer(*token, *to, *amount).await
            }
            AssetRequest::Wrap { weth, amount } => self.adapter.submit_wrap(*weth, *amount).await,
        }
    }

    async fn execute(&self, request: AssetRequest) -> StakeResult<ConfirmedTx> {
        let action = request.action();
        let backend = self.adapter.kind();
        let metrics = &self.metrics;
        let _timer = metrics
            .action_latency
            .with_label_values(&[action.as_str()])
            .start_timer();

        let result = async {
            let needed = request.amount();
            if needed.is_zero() {
                return Err(StakeError::NotApplicable(format!(
                    "{} of a zero amount",
                    action.as_str()
                )));
            }
            preflight(self.adapter.as_ref(), self.account).await?;
            let owner = self
                .account
                .active_address()
                .ok_or(StakeError::AccountNotConnected)?;
            // Gas is not included, the node rejects what the balance cannot cover
            let available = self.available(&request, owner).await?;
            if available < needed {
                return Err(StakeError::InsufficientBalance { needed, available });
            }
            let handle = self.submit(&request).await?;
            metrics
                .actions_submitted
                .with_label_values(&[backend.as_str(), action.as_str()])
                .inc();
            info!("[{}] {} submitted: {:?}", backend, action.as_str(), handle.tx_hash);
            self.adapter.await_confirmation(&handle).await
        }
        .await;

        match result {
            Ok(confirmed) => {
                metrics
                    .actions_confirmed
                    .with_label_values(&[backend.as_str(), action.as_str()])
                    .inc();
                info!(
                    "[{}] {} confirmed in block {}: {:?}",
                    backend,
                    action.as_str(),
                    confirmed.block_number,
                    confirmed.tx_hash
                );
                Ok(confirmed)
            }
            Err(e) => {
                error!("[{}] {} failed: {}", backend, action.as_str(), e);
                metrics
                    .actions_failed
                    .with_label_values(&[backend.as_str(), action.as_str(), e.error_type()])
                    .inc();
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowConfig {
    pub poll_interval: Duration,
    /// Widest block range asked for in one `eth_getLogs`
    pub max_block_range: u64,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            max_block_range: 1000,
        }
    }
}

async fn run_transfer_follower(
    adapter: Arc<dyn StakeAdapter>,
    token: EthAddress,
    mut start_block: Option<u64>,
    config: FollowConfig,
    events_tx: mpsc::Sender<TransferEvent>,
    cancel: CancellationToken,
) {
    let backend = adapter.kind();
    let max_block_range = config.max_block_range.max(1);
    info!(
        "[{}] Following transfers of {:?} from {:?}",
        backend, token, start_block
    );
    let mut interval = time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut more_blocks = false;

    loop {
        // While catching up the next range is fetched without waiting
        if !more_blocks {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Transfer follower cancelled for {:?}", backend, token);
                    break;
                }
                _ = interval.tick() => {}
            }
        } else if cancel.is_cancelled() {
            info!("[{}] Transfer follower cancelled for {:?}", backend, token);
            break;
        }

        let latest_block = match adapter.read_block_height().await {
            Ok(block) => block,
            Err(e) => {
                warn!("[{}] Cannot read latest block: {}", backend, e);
                more_blocks = false;
                continue;
            }
        };
        let start = *start_block.get_or_insert(latest_block + 1);
        if latest_block < start {
            more_blocks = false;
            continue;
        }
        let end = std::cmp::min(start + max_block_range - 1, latest_block);
        more_blocks = end < latest_block;

        match adapter.read_transfer_events(token, start, end).await {
            Ok(events) => {
                debug!(
                    "[{}] {} transfers of {:?} in blocks {}-{}",
                    backend,
                    events.len(),
                    token,
                    start,
                    end
                );
                for event in events {
                    if events_tx.send(event).await.is_err() {
                        info!("[{}] Transfer receiver dropped, stopping", backend);
                        return;
                    }
                }
                start_block = Some(end + 1);
            }
            Err(e) => {
                // Same range again on the next tick
                warn!(
                    "[{}] Fetching transfers in blocks {}-{} failed: {}",
                    backend, start, end, e
                );
                more_blocks = false;
            }
        }
    }
}
