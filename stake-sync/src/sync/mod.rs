// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Polling sync of one staking pool for one account over one adapter.
//!
//! A [`StakeSync`] starts polling when mounted and stops when unmounted or
//! dropped. Actions submit one transaction, wait for its receipt and then
//! refresh immediately instead of waiting for the next tick.
//!
//! The poll refresh and an action refresh are not serialized. If both are
//! in flight, the one that completes last wins.

pub mod store;

use crate::adapter::StakeAdapter;
use crate::error::{StakeError, StakeResult};
use crate::metrics::StakeSyncMetrics;
use crate::types::{AccountContext, ConfirmedTx, StakeAction, StakeToken, SyncSnapshot};
use ethers::types::{Address as EthAddress, U256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
pub use store::SnapshotStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a refresh needs, shared by the poll task and the actions.
#[derive(Clone)]
struct Refresher {
    adapter: Arc<dyn StakeAdapter>,
    pool_id: u64,
    account: AccountContext,
    token: StakeToken,
    store: Arc<SnapshotStore>,
    metrics: Arc<StakeSyncMetrics>,
}

impl Refresher {
    async fn refresh(&self) -> StakeResult<()> {
        let backend = self.adapter.kind();
        let reads = self
            .adapter
            .read_refresh(self.pool_id, self.account.active_address(), self.token)
            .await;
        match reads {
            Ok(reads) => {
                let block_height = reads.block_height;
                if !self.store.publish(reads) {
                    debug!("[{}] Dropping refresh result after unmount", backend);
                    return Err(StakeError::Unmounted);
                }
                self.metrics
                    .refresh_ok
                    .with_label_values(&[backend.as_str()])
                    .inc();
                self.metrics
                    .last_synced_block
                    .with_label_values(&[backend.as_str()])
                    .set(block_height as i64);
                debug!(
                    "[{}] Pool {} refreshed at block {}",
                    backend, self.pool_id, block_height
                );
                Ok(())
            }
            Err(e) => {
                // Prior snapshot stays in place
                warn!(
                    "[{}] Refresh of pool {} failed, keeping previous snapshot: {}",
                    backend, self.pool_id, e
                );
                self.metrics
                    .refresh_failed
                    .with_label_values(&[backend.as_str(), e.error_type()])
                    .inc();
                Err(e)
            }
        }
    }
}

async fn run_poll_task(refresher: Refresher, poll_interval: Duration, cancel: CancellationToken) {
    info!(
        "[{}] Starting poll task for pool {} every {:?}",
        refresher.adapter.kind(),
        refresher.pool_id,
        poll_interval
    );
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[{}] Poll task cancelled", refresher.adapter.kind());
                break;
            }
            _ = interval.tick() => {
                // Failures are absorbed, the next tick tries again
                let _ = refresher.refresh().await;
            }
        }
    }
}

/// Rejects a write before anything is signed when the wallet does not
/// match the account or the node is on another chain.
pub(crate) async fn preflight(
    adapter: &dyn StakeAdapter,
    account: AccountContext,
) -> StakeResult<()> {
    let expected = account
        .active_address()
        .ok_or(StakeError::AccountNotConnected)?;
    let signer = adapter
        .signer_address()
        .ok_or(StakeError::WalletUnavailable)?;
    if signer != expected {
        return Err(StakeError::AccountMismatch {
            expected,
            actual: signer,
        });
    }
    let chain_id = adapter.read_chain_id().await?;
    if chain_id != account.chain_id {
        return Err(StakeError::NetworkMismatch {
            expected: account.chain_id,
            actual: chain_id,
        });
    }
    Ok(())
}

enum ActionRequest {
    Approve { token: EthAddress, amount: U256 },
    Stake(U256),
    Unstake(U256),
    Claim,
    Withdraw,
}

impl ActionRequest {
    fn action(&self) -> StakeAction {
        match self {
            ActionRequest::Approve { .. } => StakeAction::Approve,
            ActionRequest::Stake(_) => StakeAction::Stake,
            ActionRequest::Unstake(_) => StakeAction::Unstake,
            ActionRequest::Claim => StakeAction::Claim,
            ActionRequest::Withdraw => StakeAction::Withdraw,
        }
    }
}

pub struct StakeSync {
    refresher: Refresher,
    cancel: CancellationToken,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StakeSync {
    /// Starts polling `pool_id` for `account`. Must be called inside a tokio runtime.
    ///
    /// `token` decides once whether `stake` uses the native or the token deposit.
    pub fn mount(
        adapter: Arc<dyn StakeAdapter>,
        pool_id: u64,
        account: AccountContext,
        token: StakeToken,
        poll_interval: Duration,
        metrics: Arc<StakeSyncMetrics>,
    ) -> Self {
        let refresher = Refresher {
            adapter,
            pool_id,
            account,
            token,
            store: Arc::new(SnapshotStore::new(account)),
            metrics,
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_poll_task(
            refresher.clone(),
            poll_interval,
            cancel.clone(),
        ));
        refresher.metrics.mounted_syncs.inc();
        Self {
            refresher,
            cancel,
            poll_handle: Mutex::new(Some(handle)),
        }
    }

    pub fn backend(&self) -> crate::types::BackendKind {
        self.refresher.adapter.kind()
    }

    pub fn pool_id(&self) -> u64 {
        self.refresher.pool_id
    }

    pub fn token(&self) -> StakeToken {
        self.refresher.token
    }

    pub fn account(&self) -> AccountContext {
        self.refresher.account
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.refresher.store.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.refresher.store.snapshot()
    }

    pub fn is_mounted(&self) -> bool {
        self.refresher.store.is_alive()
    }

    /// Whether staking `amount` needs an approve first, from the current snapshot
    pub fn needs_approval(&self, amount: U256) -> bool {
        self.snapshot().needs_approval(self.refresher.token, amount)
    }

    /// Refreshes outside the timer. Errors are reported, never published.
    pub async fn refresh_now(&self) -> StakeResult<()> {
        self.ensure_mounted()?;
        self.refresher.refresh().await
    }

    /// Stops polling. In-flight actions finish but publish nothing.
    pub fn unmount(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.poll_handle.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }
        if self.refresher.store.shut_down() {
            self.refresher.metrics.mounted_syncs.dec();
            info!(
                "[{}] Unmounted sync of pool {}",
                self.refresher.adapter.kind(),
                self.refresher.pool_id
            );
        }
    }

    /// Approves the stake contract to move `amount` of the pool token.
    pub async fn approve(&self, amount: U256) -> StakeResult<ConfirmedTx> {
        let token = self.refresher.token.erc20_address().ok_or_else(|| {
            StakeError::NotApplicable("the native pool does not use allowances".to_string())
        })?;
        self.execute(ActionRequest::Approve { token, amount }).await
    }

    pub async fn stake(&self, amount: U256) -> StakeResult<ConfirmedTx> {
        self.execute(ActionRequest::Stake(amount)).await
    }

    pub async fn unstake(&self, amount: U256) -> StakeResult<ConfirmedTx> {
        self.execute(ActionRequest::Unstake(amount)).await
    }

    pub async fn claim(&self) -> StakeResult<ConfirmedTx> {
        self.execute(ActionRequest::Claim).await
    }

    pub async fn withdraw(&self) -> StakeResult<ConfirmedTx> {
        self.execute(ActionRequest::Withdraw).await
    }

    fn ensure_mounted(&self) -> StakeResult<()> {
        if !self.is_mounted() {
            return Err(StakeError::Unmounted);
        }
        Ok(())
    }

    async fn submit(&self, request: &ActionRequest) -> StakeResult<crate::types::TxHandle> {
        let adapter = &self.refresher.adapter;
        let pool_id = self.refresher.pool_id;
        match request {
            ActionRequest::Approve { token, amount } => {
                adapter
                    .submit_approve(*token, adapter.stake_contract(), *amount)
                    .await
            }
            ActionRequest::Stake(amount) => {
                adapter
                    .submit_stake(pool_id, *amount, self.refresher.token)
                    .await
            }
            ActionRequest::Unstake(amount) => adapter.submit_unstake(pool_id, *amount).await,
            ActionRequest::Claim => adapter.submit_claim(pool_id).await,
            ActionRequest::Withdraw => adapter.submit_withdraw(pool_id).await,
        }
    }

    async fn execute(&self, request: ActionRequest) -> StakeResult<ConfirmedTx> {
        self.ensure_mounted()?;
        let action = request.action();
        let backend = self.refresher.adapter.kind();
        let metrics = &self.refresher.metrics;
        let _loading = self.refresher.store.begin_action();
        let _timer = metrics
            .action_latency
            .with_label_values(&[action.as_str()])
            .start_timer();

        let result = async {
            preflight(self.refresher.adapter.as_ref(), self.refresher.account).await?;
            self.ensure_mounted()?;
            let handle = self.submit(&request).await?;
            metrics
                .actions_submitted
                .with_label_values(&[backend.as_str(), action.as_str()])
                .inc();
            info!("[{}] {} submitted: {:?}", backend, action.as_str(), handle.tx_hash);
            self.refresher.adapter.await_confirmation(&handle).await
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
                if self.is_mounted() {
                    // A failed follow-up read is absorbed like any poll failure
                    let _ = self.refresher.refresh().await;
                }
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

impl Drop for StakeSync {
    fn drop(&mut self) {
        self.unmount();
    }
}
