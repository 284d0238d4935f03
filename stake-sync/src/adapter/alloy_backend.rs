// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Adapter over alloy `sol!` bindings and a type-erased alloy provider.

use super::{confirmed_tx, poll_receipt, reclassify_timeout, u256_to_u64, StakeAdapter};
use crate::config::ResolvedConfig;
use crate::error::{StakeError, StakeResult};
use crate::events::{decode_transfer_events, TransferEvent};
use crate::metrics::StakeSyncMetrics;
use crate::types::{
    BackendKind, ConfirmedTx, PoolSnapshot, StakeToken, StakingOverview, TokenInfo, TokenMetadata,
    TxHandle, UserPosition, WithdrawRequestState,
};
use crate::wallet::WalletProvider;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256 as AlloyU256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy::transports::{RpcError, TransportError};
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, Log, TxHash, H256, U256, U64};
use prometheus::HistogramTimer;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tracing::{error, info};
use url::Url;

sol!(
    #[sol(rpc)]
    MetaNodeStake,
    "abi/MetaNodeStake.json"
);

sol!(
    #[sol(rpc)]
    ERC20,
    "abi/ERC20.json"
);

sol!(
    #[sol(rpc)]
    WETH9,
    "abi/WETH9.json"
);

pub(crate) fn to_alloy_u256(value: U256) -> AlloyU256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    AlloyU256::from_be_bytes(buf)
}

pub(crate) fn from_alloy_u256(value: AlloyU256) -> U256 {
    U256::from_big_endian(&value.to_be_bytes::<32>())
}

pub(crate) fn to_alloy_address(address: EthAddress) -> Address {
    Address::from(address.0)
}

pub(crate) fn from_alloy_address(address: Address) -> EthAddress {
    EthAddress::from(address.0 .0)
}

/// Converts an alloy RPC log into the ethers shape the event decoder reads.
pub(crate) fn to_ethers_log(log: &alloy::rpc::types::Log) -> Log {
    Log {
        address: from_alloy_address(log.inner.address),
        topics: log
            .inner
            .data
            .topics()
            .iter()
            .map(|t| H256::from(t.0))
            .collect(),
        data: log.inner.data.data.to_vec().into(),
        block_hash: log.block_hash.map(|h| H256::from(h.0)),
        block_number: log.block_number.map(U64::from),
        transaction_hash: log.transaction_hash.map(|h| H256::from(h.0)),
        transaction_index: log.transaction_index.map(U64::from),
        log_index: log.log_index.map(U256::from),
        removed: Some(log.removed),
        ..Default::default()
    }
}

fn transport_err(e: TransportError) -> StakeError {
    match e {
        RpcError::Transport(kind) => StakeError::TransientProviderError(kind.to_string()),
        other => StakeError::ProviderError(other.to_string()),
    }
}

fn contract_err(e: alloy::contract::Error) -> StakeError {
    match e {
        alloy::contract::Error::TransportError(e) => transport_err(e),
        other => StakeError::ProviderError(other.to_string()),
    }
}

fn alloy_signer(wallet: &Arc<dyn WalletProvider>) -> StakeResult<EthereumWallet> {
    let signer = PrivateKeySigner::from_bytes(&B256::from(wallet.secret_bytes()))
        .map_err(|e| StakeError::InvalidConfig(format!("Invalid signing key: {}", e)))?;
    Ok(EthereumWallet::from(signer))
}

fn build_provider(
    rpc_url: Url,
    wallet: Option<&Arc<dyn WalletProvider>>,
) -> StakeResult<DynProvider> {
    let provider = match wallet {
        Some(wallet) => ProviderBuilder::new()
            .wallet(alloy_signer(wallet)?)
            .connect_http(rpc_url)
            .erased(),
        None => ProviderBuilder::new().connect_http(rpc_url).erased(),
    };
    Ok(provider)
}

pub struct AlloyStakeAdapter {
    provider: DynProvider,
    stake: MetaNodeStake::MetaNodeStakeInstance<DynProvider>,
    wallet: Option<Arc<dyn WalletProvider>>,
    stake_contract: EthAddress,
    confirmation_timeout: Duration,
    metrics: Arc<StakeSyncMetrics>,
}

impl AlloyStakeAdapter {
    pub fn new(config: &ResolvedConfig, metrics: Arc<StakeSyncMetrics>) -> StakeResult<Self> {
        let provider = build_provider(config.rpc_url.clone(), config.wallet.as_ref())?;
        Ok(Self::with_provider(
            provider,
            config.stake_contract,
            config.wallet.clone(),
            config.confirmation_timeout,
            metrics,
        ))
    }

    pub fn with_provider(
        provider: DynProvider,
        stake_contract: EthAddress,
        wallet: Option<Arc<dyn WalletProvider>>,
        confirmation_timeout: Duration,
        metrics: Arc<StakeSyncMetrics>,
    ) -> Self {
        let stake = MetaNodeStake::new(to_alloy_address(stake_contract), provider.clone());
        Self {
            provider,
            stake,
            wallet,
            stake_contract,
            confirmation_timeout,
            metrics,
        }
    }

    fn erc20(&self, token: EthAddress) -> ERC20::ERC20Instance<DynProvider> {
        ERC20::new(to_alloy_address(token), self.provider.clone())
    }

    fn observe(&self, method: &str) -> HistogramTimer {
        let label = format!("alloy_{}", method);
        self.metrics
            .eth_rpc_queries
            .with_label_values(&[label.as_str()])
            .inc();
        self.metrics
            .eth_rpc_queries_latency
            .with_label_values(&[label.as_str()])
            .start_timer()
    }

    /// Checks for a wallet and fetches the gas price every write is sent with.
    /// A set gas price makes the gas filler take the legacy path.
    async fn legacy_gas_price(&self, label: &str) -> StakeResult<u128> {
        if self.wallet.is_none() {
            return Err(StakeError::WalletUnavailable);
        }
        let _timer = self.observe("gasPrice");
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| StakeError::SubmissionFailed(e.to_string()))
            .tap_err(|e| error!("[alloy] {} could not be priced: {}", label, e))
    }

    fn submitted(&self, tx_hash: B256, label: &str) -> TxHandle {
        let tx_hash = TxHash::from(tx_hash.0);
        info!("[alloy] {} submitted: {:?}", label, tx_hash);
        TxHandle {
            tx_hash,
            backend: BackendKind::Alloy,
        }
    }
}

fn submit_err<E: std::fmt::Display>(label: &str) -> impl Fn(E) -> StakeError + '_ {
    move |e| {
        error!("[alloy] {} submission failed: {}", label, e);
        StakeError::SubmissionFailed(e.to_string())
    }
}

#[async_trait]
impl StakeAdapter for AlloyStakeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Alloy
    }

    fn stake_contract(&self) -> EthAddress {
        self.stake_contract
    }

    fn signer_address(&self) -> Option<EthAddress> {
        self.wallet.as_ref().map(|w| w.address())
    }

    async fn read_pool(&self, pool_id: u64) -> StakeResult<PoolSnapshot> {
        let _timer = self.observe("pool");
        let pool = self
            .stake
            .pool(AlloyU256::from(pool_id))
            .call()
            .await
            .map_err(contract_err)?;
        Ok(PoolSnapshot {
            pool_id,
            stake_token: StakeToken::from_address(from_alloy_address(pool.stTokenAddress)),
            pool_weight: from_alloy_u256(pool.poolWeight),
            last_reward_block: from_alloy_u256(pool.lastRewardBlock),
            acc_reward_per_share: from_alloy_u256(pool.accMetaNodePerST),
            total_staked: from_alloy_u256(pool.stTokenAmount),
            min_deposit: from_alloy_u256(pool.minDepositAmount),
            unstake_lock_blocks: from_alloy_u256(pool.unstakeLockedBlocks),
        })
    }

    async fn read_user_position(
        &self,
        pool_id: u64,
        account: EthAddress,
        token: StakeToken,
    ) -> StakeResult<UserPosition> {
        let _timer = self.observe("user_position");
        let pid = AlloyU256::from(pool_id);
        let user = to_alloy_address(account);
        let staked_call = self.stake.stakingBalance(pid, user);
        let reward_call = self.stake.pendingMetaNode(pid, user);
        let (staked_balance, pending_reward) = tokio::try_join!(
            async { staked_call.call().await.map_err(contract_err) },
            async { reward_call.call().await.map_err(contract_err) },
        )?;

        let (wallet_balance, allowance) = match token {
            StakeToken::Native => {
                let balance = self
                    .provider
                    .get_balance(user)
                    .await
                    .map_err(transport_err)?;
                (balance, AlloyU256::ZERO)
            }
            StakeToken::Erc20(token) => {
                let erc20 = self.erc20(token);
                let balance_call = erc20.balanceOf(user);
                let allowance_call = erc20.allowance(user, to_alloy_address(self.stake_contract));
                tokio::try_join!(
                    async { balance_call.call().await.map_err(contract_err) },
                    async { allowance_call.call().await.map_err(contract_err) },
                )?
            }
        };

        Ok(UserPosition {
            staked_balance: from_alloy_u256(staked_balance),
            wallet_balance: from_alloy_u256(wallet_balance),
            allowance: from_alloy_u256(allowance),
            pending_reward: from_alloy_u256(pending_reward),
        })
    }

    async fn read_withdraw_state(
        &self,
        pool_id: u64,
        account: EthAddress,
    ) -> StakeResult<WithdrawRequestState> {
        let _timer = self.observe("withdrawAmount");
        let result = self
            .stake
            .withdrawAmount(AlloyU256::from(pool_id), to_alloy_address(account))
            .call()
            .await
            .map_err(contract_err)?;
        WithdrawRequestState::new(
            from_alloy_u256(result.requestAmount),
            from_alloy_u256(result.pendingWithdrawAmount),
        )
    }

    async fn read_block_height(&self) -> StakeResult<u64> {
        let _timer = self.observe("blockNumber");
        self.provider.get_block_number().await.map_err(transport_err)
    }

    async fn read_chain_id(&self) -> StakeResult<u64> {
        let _timer = self.observe("chainId");
        self.provider.get_chain_id().await.map_err(transport_err)
    }

    async fn read_overview(&self) -> StakeResult<StakingOverview> {
        let _timer = self.observe("overview");
        let pool_length = self.stake.poolLength();
        let start_block = self.stake.startBlock();
        let end_block = self.stake.endBlock();
        let reward_per_block = self.stake.MetaNodePerBlock();
        let total_pool_weight = self.stake.totalPoolWeight();
        let (pool_count, start_block, end_block, reward_per_block, total_pool_weight) =
            tokio::try_join!(
                async { pool_length.call().await.map_err(contract_err) },
                async { start_block.call().await.map_err(contract_err) },
                async { end_block.call().await.map_err(contract_err) },
                async { reward_per_block.call().await.map_err(contract_err) },
                async { total_pool_weight.call().await.map_err(contract_err) },
            )?;
        Ok(StakingOverview {
            pool_count: u256_to_u64(from_alloy_u256(pool_count), "pool length")?,
            start_block: from_alloy_u256(start_block),
            end_block: from_alloy_u256(end_block),
            reward_per_block: from_alloy_u256(reward_per_block),
            total_pool_weight: from_alloy_u256(total_pool_weight),
        })
    }

    async fn read_token_metadata(&self, token: StakeToken) -> StakeResult<TokenMetadata> {
        let StakeToken::Erc20(address) = token else {
            return Ok(TokenMetadata::native());
        };
        let _timer = self.observe("token_metadata");
        let erc20 = self.erc20(address);
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();
        let (symbol, decimals) = tokio::try_join!(
            async { symbol_call.call().await.map_err(contract_err) },
            async { decimals_call.call().await.map_err(contract_err) },
        )?;
        Ok(TokenMetadata { symbol, decimals })
    }

    async fn read_native_balance(&self, address: EthAddress) -> StakeResult<U256> {
        let _timer = self.observe("getBalance");
        let balance = self
            .provider
            .get_balance(to_alloy_address(address))
            .await
            .map_err(transport_err)?;
        Ok(from_alloy_u256(balance))
    }

    async fn read_token_info(
        &self,
        token: EthAddress,
        holder: Option<EthAddress>,
    ) -> StakeResult<TokenInfo> {
        let _timer = self.observe("token_info");
        let erc20 = self.erc20(token);
        let name_call = erc20.name();
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();
        let supply_call = erc20.totalSupply();
        let (name, symbol, decimals, total_supply) = tokio::try_join!(
            async { name_call.call().await.map_err(contract_err) },
            async { symbol_call.call().await.map_err(contract_err) },
            async { decimals_call.call().await.map_err(contract_err) },
            async { supply_call.call().await.map_err(contract_err) },
        )?;
        let holder_balance = match holder {
            Some(holder) => {
                let balance = erc20
                    .balanceOf(to_alloy_address(holder))
                    .call()
                    .await
                    .map_err(contract_err)?;
                Some(from_alloy_u256(balance))
            }
            None => None,
        };
        Ok(TokenInfo {
            address: token,
            name,
            symbol,
            decimals,
            total_supply: from_alloy_u256(total_supply),
            holder_balance,
        })
    }

    async fn read_transfer_events(
        &self,
        token: EthAddress,
        from_block: u64,
        to_block: u64,
    ) -> StakeResult<Vec<TransferEvent>> {
        let _timer = self.observe("getLogs");
        let filter = Filter::new()
            .address(to_alloy_address(token))
            .event_signature(ERC20::Transfer::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(transport_err)?;
        let logs: Vec<Log> = logs.iter().map(to_ethers_log).collect();
        decode_transfer_events(token, &logs)
    }

    async fn submit_approve(
        &self,
        token: EthAddress,
        spender: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("approve").await?;
        let pending = self
            .erc20(token)
            .approve(to_alloy_address(spender), to_alloy_u256(amount))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("approve"))?;
        Ok(self.submitted(*pending.tx_hash(), "approve"))
    }

    async fn submit_native_deposit(&self, amount: U256) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("depositETH").await?;
        let pending = self
            .stake
            .depositETH()
            .value(to_alloy_u256(amount))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("depositETH"))?;
        Ok(self.submitted(*pending.tx_hash(), "depositETH"))
    }

    async fn submit_token_deposit(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("deposit").await?;
        let pending = self
            .stake
            .deposit(AlloyU256::from(pool_id), to_alloy_u256(amount))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("deposit"))?;
        Ok(self.submitted(*pending.tx_hash(), "deposit"))
    }

    async fn submit_unstake(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("unstake").await?;
        let pending = self
            .stake
            .unstake(AlloyU256::from(pool_id), to_alloy_u256(amount))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("unstake"))?;
        Ok(self.submitted(*pending.tx_hash(), "unstake"))
    }

    async fn submit_claim(&self, pool_id: u64) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("claim").await?;
        let pending = self
            .stake
            .claim(AlloyU256::from(pool_id))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("claim"))?;
        Ok(self.submitted(*pending.tx_hash(), "claim"))
    }

    async fn submit_withdraw(&self, pool_id: u64) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("withdraw").await?;
        let pending = self
            .stake
            .withdraw(AlloyU256::from(pool_id))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("withdraw"))?;
        Ok(self.submitted(*pending.tx_hash(), "withdraw"))
    }

    async fn submit_native_transfer(&self, to: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("send").await?;
        let tx = TransactionRequest::default()
            .with_to(to_alloy_address(to))
            .with_value(to_alloy_u256(amount))
            .with_gas_price(gas_price);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(submit_err("send"))?;
        Ok(self.submitted(*pending.tx_hash(), "send"))
    }

    async fn submit_token_transfer(
        &self,
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("transfer").await?;
        let pending = self
            .erc20(token)
            .transfer(to_alloy_address(to), to_alloy_u256(amount))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("transfer"))?;
        Ok(self.submitted(*pending.tx_hash(), "transfer"))
    }

    async fn submit_wrap(&self, weth: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let gas_price = self.legacy_gas_price("wrap").await?;
        let pending = WETH9::new(to_alloy_address(weth), self.provider.clone())
            .deposit()
            .value(to_alloy_u256(amount))
            .gas_price(gas_price)
            .send()
            .await
            .map_err(submit_err("wrap"))?;
        Ok(self.submitted(*pending.tx_hash(), "wrap"))
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> StakeResult<ConfirmedTx> {
        let tx_hash = handle.tx_hash;
        let hash = B256::from(tx_hash.0);
        let provider = self.provider.clone();
        let receipt = match poll_receipt(tx_hash, self.confirmation_timeout, || {
            let provider = provider.clone();
            async move {
                provider
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(transport_err)
            }
        })
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let known = self
                    .provider
                    .get_transaction_by_hash(hash)
                    .await
                    .map(|tx| tx.is_some())
                    .map_err(transport_err);
                return Err(reclassify_timeout(e, known));
            }
        };
        let logs: Vec<Log> = receipt.inner.logs().iter().map(to_ethers_log).collect();
        confirmed_tx(
            self.stake_contract,
            tx_hash,
            receipt.status(),
            receipt.block_number,
            Some(U256::from(receipt.gas_used)),
            &logs,
        )
        .tap_err(|e| error!("[alloy] {:?} not confirmed: {}", tx_hash, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StakeEvent;
    use crate::test_utils::{dev_wallet, test_pool_record};
    use alloy::consensus::{Eip658Value, Receipt, ReceiptEnvelope, ReceiptWithBloom};
    use alloy::primitives::{Bloom, Bytes as AlloyBytes, LogData};
    use alloy::providers::mock::Asserter;
    use alloy::rpc::types::TransactionReceipt;
    use ethers::abi::AbiEncode;

    /// Adapter over a mocked transport answering requests in push order.
    fn mocked(wallet: Option<Arc<dyn WalletProvider>>) -> (AlloyStakeAdapter, Asserter) {
        let asserter = Asserter::new();
        let provider = match &wallet {
            Some(wallet) => ProviderBuilder::new()
                .wallet(alloy_signer(wallet).unwrap())
                .connect_mocked_client(asserter.clone())
                .erased(),
            None => ProviderBuilder::new()
                .connect_mocked_client(asserter.clone())
                .erased(),
        };
        let adapter = AlloyStakeAdapter::with_provider(
            provider,
            EthAddress::repeat_byte(0x5e),
            wallet,
            Duration::from_secs(5),
            Arc::new(StakeSyncMetrics::new_for_testing()),
        );
        (adapter, asserter)
    }

    /// Queues the answers of one legacy write: gas price, then gas limit,
    /// nonce and (on a provider's first write only) chain id, then the broadcast.
    fn push_write_path(asserter: &Asserter, tx_hash: B256, first_write: bool) {
        asserter.push_success(&"0x3b9aca00");
        // The fillers run concurrently, so the quantities share one value
        let fills = if first_write { 3 } else { 2 };
        for _ in 0..fills {
            asserter.push_success(&"0x7a69");
        }
        asserter.push_success(&tx_hash);
    }

    fn mined_receipt(tx_hash: B256, logs: Vec<alloy::rpc::types::Log>) -> TransactionReceipt {
        TransactionReceipt {
            inner: ReceiptEnvelope::Legacy(ReceiptWithBloom {
                receipt: Receipt {
                    status: Eip658Value::Eip658(true),
                    cumulative_gas_used: 21_000,
                    logs,
                },
                logs_bloom: Bloom::default(),
            }),
            transaction_hash: tx_hash,
            transaction_index: Some(0),
            block_hash: Some(B256::repeat_byte(0x42)),
            block_number: Some(42),
            gas_used: 21_000,
            effective_gas_price: 1_000_000_000,
            blob_gas_used: None,
            blob_gas_price: None,
            from: Address::repeat_byte(0x01),
            to: Some(Address::repeat_byte(0x5e)),
            contract_address: None,
        }
    }

    fn adapter(url: &str, wallet: Option<Arc<dyn WalletProvider>>) -> AlloyStakeAdapter {
        let provider = build_provider(Url::parse(url).unwrap(), wallet.as_ref()).unwrap();
        AlloyStakeAdapter::with_provider(
            provider,
            EthAddress::repeat_byte(0x5e),
            wallet,
            Duration::from_secs(1),
            Arc::new(StakeSyncMetrics::new_for_testing()),
        )
    }

    #[test]
    fn test_u256_and_address_conversions() {
        let value = U256::from_dec_str("123456789012345678901234567890").unwrap();
        assert_eq!(from_alloy_u256(to_alloy_u256(value)), value);
        assert_eq!(
            to_alloy_u256(U256::MAX),
            AlloyU256::MAX,
            "full width must survive"
        );
        let address = EthAddress::repeat_byte(0x42);
        assert_eq!(from_alloy_address(to_alloy_address(address)), address);
        assert_eq!(to_alloy_address(EthAddress::zero()), Address::ZERO);
    }

    #[test]
    fn test_alloy_log_decodes_as_stake_event() {
        let contract = EthAddress::repeat_byte(0x5e);
        let user = Address::repeat_byte(0x01);
        let event = MetaNodeStake::RequestUnstake {
            user,
            poolId: AlloyU256::from(2u64),
            amount: AlloyU256::from(700u64),
        };
        let data: LogData = event.encode_log_data();
        let log = alloy::rpc::types::Log {
            inner: alloy::primitives::Log {
                address: to_alloy_address(contract),
                data,
            },
            ..Default::default()
        };
        let ethers_log = to_ethers_log(&log);
        let decoded = crate::events::decode_stake_events(contract, &[ethers_log]);
        assert_eq!(
            decoded,
            vec![StakeEvent::RequestUnstake {
                user: from_alloy_address(user),
                pool_id: U256::from(2u64),
                amount: U256::from(700u64),
            }]
        );
    }

    #[tokio::test]
    async fn test_reads_against_unreachable_node_fail_transiently() {
        let adapter = adapter("http://127.0.0.1:9", None);
        let err = adapter.read_block_height().await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
        assert_eq!(
            adapter
                .metrics
                .eth_rpc_queries
                .with_label_values(&["alloy_blockNumber"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_writes_need_wallet() {
        let adapter = adapter("http://127.0.0.1:9", None);
        assert_eq!(adapter.signer_address(), None);
        assert_eq!(
            adapter.submit_claim(0).await.unwrap_err(),
            StakeError::WalletUnavailable
        );
        let wallet: Arc<dyn WalletProvider> = crate::test_utils::dev_wallet();
        let adapter = self::adapter("http://127.0.0.1:9", Some(wallet.clone()));
        assert_eq!(adapter.signer_address(), Some(wallet.address()));
    }

    #[tokio::test]
    async fn test_reads_over_mocked_transport() {
        let (adapter, asserter) = mocked(None);
        asserter.push_success(&AlloyBytes::from(
            test_pool_record(EthAddress::zero()).encode(),
        ));
        let pool = adapter.read_pool(0).await.unwrap();
        assert!(pool.is_native());
        assert_eq!(pool.min_deposit, U256::from(10u64));
        assert_eq!(pool.unstake_lock_blocks, U256::from(20u64));

        asserter.push_success(&AlloyU256::from(123u64));
        let balance = adapter
            .read_native_balance(EthAddress::repeat_byte(0x01))
            .await
            .unwrap();
        assert_eq!(balance, U256::from(123u64));

        asserter.push_success(&"0x2a");
        assert_eq!(adapter.read_block_height().await.unwrap(), 42);
        assert!(asserter.read_q().is_empty());
    }

    #[tokio::test]
    async fn test_read_transfer_events_over_mocked_transport() {
        let (adapter, asserter) = mocked(None);
        let token = EthAddress::repeat_byte(0x70);
        let transfer = ERC20::Transfer {
            from: Address::repeat_byte(0x01),
            to: Address::repeat_byte(0x02),
            value: AlloyU256::from(900u64),
        };
        let log = alloy::rpc::types::Log {
            inner: alloy::primitives::Log {
                address: to_alloy_address(token),
                data: transfer.encode_log_data(),
            },
            block_number: Some(77),
            transaction_hash: Some(B256::repeat_byte(0x77)),
            log_index: Some(3),
            ..Default::default()
        };
        asserter.push_success(&vec![log]);

        let events = adapter.read_transfer_events(token, 70, 80).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, EthAddress::repeat_byte(0x01));
        assert_eq!(events[0].value, U256::from(900u64));
        assert_eq!(events[0].block_number, 77);
        assert_eq!(events[0].log_index, Some(3));
        assert_eq!(events[0].tx_hash, Some(TxHash::repeat_byte(0x77)));
    }

    #[tokio::test]
    async fn test_submit_and_confirm_over_mocked_transport() {
        let wallet = dev_wallet();
        let user = wallet.address();
        let (adapter, asserter) = mocked(Some(wallet));
        let tx_hash = B256::repeat_byte(0xab);
        push_write_path(&asserter, tx_hash, true);

        let handle = adapter
            .submit_stake(0, U256::from(1000u64), StakeToken::Native)
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, TxHash::repeat_byte(0xab));
        assert_eq!(handle.backend, BackendKind::Alloy);
        assert!(asserter.read_q().is_empty());

        let deposit = MetaNodeStake::Deposit {
            user: to_alloy_address(user),
            poolId: AlloyU256::ZERO,
            amount: AlloyU256::from(1000u64),
        };
        let log = alloy::rpc::types::Log {
            inner: alloy::primitives::Log {
                address: to_alloy_address(adapter.stake_contract),
                data: deposit.encode_log_data(),
            },
            block_number: Some(42),
            ..Default::default()
        };
        asserter.push_success(&mined_receipt(tx_hash, vec![log]));
        let confirmed = adapter.await_confirmation(&handle).await.unwrap();
        assert_eq!(confirmed.block_number, 42);
        assert_eq!(confirmed.gas_used, Some(U256::from(21_000u64)));
        assert_eq!(
            confirmed.events,
            vec![StakeEvent::Deposit {
                user,
                pool_id: U256::zero(),
                amount: U256::from(1000u64),
            }]
        );
    }

    #[tokio::test]
    async fn test_transfers_and_wrap_over_mocked_transport() {
        let (adapter, asserter) = mocked(Some(dev_wallet()));
        let to = EthAddress::repeat_byte(0x02);

        push_write_path(&asserter, B256::repeat_byte(0x01), true);
        let handle = adapter
            .submit_native_transfer(to, U256::from(5u64))
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, TxHash::repeat_byte(0x01));

        // The chain id is cached after the first write
        push_write_path(&asserter, B256::repeat_byte(0x02), false);
        let handle = adapter
            .submit_token_transfer(EthAddress::repeat_byte(0x70), to, U256::from(5u64))
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, TxHash::repeat_byte(0x02));

        push_write_path(&asserter, B256::repeat_byte(0x03), false);
        let handle = adapter
            .submit_wrap(EthAddress::repeat_byte(0x71), U256::from(5u64))
            .await
            .unwrap();
        assert_eq!(handle.tx_hash, TxHash::repeat_byte(0x03));
        assert!(asserter.read_q().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_broadcast_is_submission_failure() {
        let (adapter, asserter) = mocked(Some(dev_wallet()));
        asserter.push_success(&"0x3b9aca00");
        for _ in 0..3 {
            asserter.push_success(&"0x7a69");
        }
        asserter.push_failure_msg("insufficient funds for gas * price + value");
        let err = adapter.submit_claim(0).await.unwrap_err();
        assert!(
            matches!(&err, StakeError::SubmissionFailed(msg) if msg.contains("insufficient funds")),
            "{:?}",
            err
        );
    }
}
