// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Adapter over the abigen-generated ethers contract bindings.

use super::{
    confirmed_tx, poll_receipt, pool_from_record, reclassify_timeout, u256_to_u64, StakeAdapter,
};
use crate::abi::weth::WETH9;
use crate::abi::{MetaNodeStake, TransferFilter, ERC20};
use crate::config::ResolvedConfig;
use crate::error::{StakeError, StakeResult};
use crate::events::{decode_transfer_events, TransferEvent};
use crate::metered_eth_provider::{new_metered_eth_provider, MeteredEthHttpProvider};
use crate::metrics::StakeSyncMetrics;
use crate::types::{
    BackendKind, ConfirmedTx, PoolSnapshot, StakeToken, StakingOverview, TokenInfo, TokenMetadata,
    TxHandle, UserPosition, WithdrawRequestState,
};
use crate::wallet::WalletProvider;
use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{ContractCall, ContractError, EthEvent};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address as EthAddress, Filter, TransactionRequest, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tracing::{error, info};

#[cfg(test)]
use crate::eth_mock_provider::EthMockProvider;

type SignerClient<P> = SignerMiddleware<Provider<P>, LocalWallet>;

pub struct EthersStakeAdapter<P> {
    provider: Arc<Provider<P>>,
    stake: MetaNodeStake<Provider<P>>,
    signer: Option<Arc<SignerClient<P>>>,
    wallet: Option<Arc<dyn WalletProvider>>,
    stake_contract: EthAddress,
    confirmation_timeout: Duration,
}

impl EthersStakeAdapter<MeteredEthHttpProvider> {
    pub fn new(config: &ResolvedConfig, metrics: Arc<StakeSyncMetrics>) -> StakeResult<Self> {
        let provider = new_metered_eth_provider(
            config.rpc_url.as_str(),
            metrics,
            config.max_concurrent_requests,
        )
        .map_err(|e| StakeError::InvalidConfig(format!("Invalid rpc url: {}", e)))?;
        Ok(Self::with_provider(
            provider,
            config.stake_contract,
            config.wallet.clone(),
            config.confirmation_timeout,
        ))
    }
}

#[cfg(test)]
impl EthersStakeAdapter<EthMockProvider> {
    pub fn new_mocked(
        provider: EthMockProvider,
        stake_contract: EthAddress,
        wallet: Option<Arc<dyn WalletProvider>>,
    ) -> Self {
        Self::with_provider(
            Provider::new(provider),
            stake_contract,
            wallet,
            Duration::from_secs(5),
        )
    }
}

fn read_err<P: JsonRpcClient>(e: ContractError<Provider<P>>) -> StakeError {
    match e {
        ContractError::MiddlewareError { e } | ContractError::ProviderError { e } => {
            StakeError::from(e)
        }
        other => StakeError::ProviderError(other.to_string()),
    }
}

impl<P> EthersStakeAdapter<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    pub fn with_provider(
        provider: Provider<P>,
        stake_contract: EthAddress,
        wallet: Option<Arc<dyn WalletProvider>>,
        confirmation_timeout: Duration,
    ) -> Self {
        let signer = wallet
            .as_ref()
            .map(|w| Arc::new(SignerMiddleware::new(provider.clone(), w.local_wallet())));
        let provider = Arc::new(provider);
        let stake = MetaNodeStake::new(stake_contract, provider.clone());
        Self {
            provider,
            stake,
            signer,
            wallet,
            stake_contract,
            confirmation_timeout,
        }
    }

    fn signer(&self) -> StakeResult<Arc<SignerClient<P>>> {
        self.signer.clone().ok_or(StakeError::WalletUnavailable)
    }

    fn stake_writer(&self) -> StakeResult<MetaNodeStake<SignerClient<P>>> {
        Ok(MetaNodeStake::new(self.stake_contract, self.signer()?))
    }

    async fn send<D: Detokenize + Send + Sync>(
        &self,
        call: ContractCall<SignerClient<P>, D>,
        label: &str,
    ) -> StakeResult<TxHandle> {
        // Legacy pricing keeps fee discovery to a single eth_gasPrice
        let call = call.legacy();
        let pending = call
            .send()
            .await
            .map_err(|e| StakeError::SubmissionFailed(e.to_string()))
            .tap_err(|e| error!("[ethers] {} submission failed: {}", label, e))?;
        Ok(submitted(pending.tx_hash(), label))
    }
}

fn submitted(tx_hash: TxHash, label: &str) -> TxHandle {
    info!("[ethers] {} submitted: {:?}", label, tx_hash);
    TxHandle {
        tx_hash,
        backend: BackendKind::Ethers,
    }
}

#[async_trait]
impl<P> StakeAdapter for EthersStakeAdapter<P>
where
    P: JsonRpcClient + Clone + 'static,
{
    fn kind(&self) -> BackendKind {
        BackendKind::Ethers
    }

    fn stake_contract(&self) -> EthAddress {
        self.stake_contract
    }

    fn signer_address(&self) -> Option<EthAddress> {
        self.wallet.as_ref().map(|w| w.address())
    }

    async fn read_pool(&self, pool_id: u64) -> StakeResult<PoolSnapshot> {
        let record = self
            .stake
            .pool(U256::from(pool_id))
            .call()
            .await
            .map_err(read_err)?;
        Ok(pool_from_record(pool_id, record))
    }

    async fn read_user_position(
        &self,
        pool_id: u64,
        account: EthAddress,
        token: StakeToken,
    ) -> StakeResult<UserPosition> {
        let pid = U256::from(pool_id);
        let staked_call = self.stake.staking_balance(pid, account);
        let reward_call = self.stake.pending_meta_node(pid, account);
        let (staked_balance, pending_reward) = tokio::try_join!(
            async { staked_call.call().await.map_err(read_err) },
            async { reward_call.call().await.map_err(read_err) },
        )?;

        let (wallet_balance, allowance) = match token {
            StakeToken::Native => {
                let balance = self.provider.get_balance(account, None).await?;
                (balance, U256::zero())
            }
            StakeToken::Erc20(token) => {
                let erc20 = ERC20::new(token, self.provider.clone());
                let balance_call = erc20.balance_of(account);
                let allowance_call = erc20.allowance(account, self.stake_contract);
                tokio::try_join!(
                    async { balance_call.call().await.map_err(read_err) },
                    async { allowance_call.call().await.map_err(read_err) },
                )?
            }
        };

        Ok(UserPosition {
            staked_balance,
            wallet_balance,
            allowance,
            pending_reward,
        })
    }

    async fn read_withdraw_state(
        &self,
        pool_id: u64,
        account: EthAddress,
    ) -> StakeResult<WithdrawRequestState> {
        let (requested, unlocked) = self
            .stake
            .withdraw_amount(U256::from(pool_id), account)
            .call()
            .await
            .map_err(read_err)?;
        WithdrawRequestState::new(requested, unlocked)
    }

    async fn read_block_height(&self) -> StakeResult<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn read_chain_id(&self) -> StakeResult<u64> {
        u256_to_u64(self.provider.get_chainid().await?, "chain id")
    }

    async fn read_overview(&self) -> StakeResult<StakingOverview> {
        let pool_length = self.stake.pool_length();
        let start_block = self.stake.start_block();
        let end_block = self.stake.end_block();
        let reward_per_block = self.stake.meta_node_per_block();
        let total_pool_weight = self.stake.total_pool_weight();
        let (pool_count, start_block, end_block, reward_per_block, total_pool_weight) =
            tokio::try_join!(
                async { pool_length.call().await.map_err(read_err) },
                async { start_block.call().await.map_err(read_err) },
                async { end_block.call().await.map_err(read_err) },
                async { reward_per_block.call().await.map_err(read_err) },
                async { total_pool_weight.call().await.map_err(read_err) },
            )?;
        Ok(StakingOverview {
            pool_count: u256_to_u64(pool_count, "pool length")?,
            start_block,
            end_block,
            reward_per_block,
            total_pool_weight,
        })
    }

    async fn read_token_metadata(&self, token: StakeToken) -> StakeResult<TokenMetadata> {
        let StakeToken::Erc20(address) = token else {
            return Ok(TokenMetadata::native());
        };
        let erc20 = ERC20::new(address, self.provider.clone());
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();
        let (symbol, decimals) = tokio::try_join!(
            async { symbol_call.call().await.map_err(read_err) },
            async { decimals_call.call().await.map_err(read_err) },
        )?;
        Ok(TokenMetadata { symbol, decimals })
    }

    async fn read_native_balance(&self, address: EthAddress) -> StakeResult<U256> {
        Ok(self.provider.get_balance(address, None).await?)
    }

    async fn read_token_info(
        &self,
        token: EthAddress,
        holder: Option<EthAddress>,
    ) -> StakeResult<TokenInfo> {
        let erc20 = ERC20::new(token, self.provider.clone());
        let name_call = erc20.name();
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();
        let supply_call = erc20.total_supply();
        let (name, symbol, decimals, total_supply) = tokio::try_join!(
            async { name_call.call().await.map_err(read_err) },
            async { symbol_call.call().await.map_err(read_err) },
            async { decimals_call.call().await.map_err(read_err) },
            async { supply_call.call().await.map_err(read_err) },
        )?;
        let holder_balance = match holder {
            Some(holder) => Some(erc20.balance_of(holder).call().await.map_err(read_err)?),
            None => None,
        };
        Ok(TokenInfo {
            address: token,
            name,
            symbol,
            decimals,
            total_supply,
            holder_balance,
        })
    }

    async fn read_transfer_events(
        &self,
        token: EthAddress,
        from_block: u64,
        to_block: u64,
    ) -> StakeResult<Vec<TransferEvent>> {
        let filter = Filter::new()
            .address(token)
            .topic0(TransferFilter::signature())
            .from_block(from_block)
            .to_block(to_block);
        let logs = self.provider.get_logs(&filter).await?;
        decode_transfer_events(token, &logs)
    }

    async fn submit_approve(
        &self,
        token: EthAddress,
        spender: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let erc20 = ERC20::new(token, self.signer()?);
        self.send(erc20.approve(spender, amount), "approve").await
    }

    async fn submit_native_deposit(&self, amount: U256) -> StakeResult<TxHandle> {
        let stake = self.stake_writer()?;
        self.send(stake.deposit_eth().value(amount), "depositETH").await
    }

    async fn submit_token_deposit(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle> {
        let stake = self.stake_writer()?;
        self.send(stake.deposit(U256::from(pool_id), amount), "deposit").await
    }

    async fn submit_unstake(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle> {
        let stake = self.stake_writer()?;
        self.send(stake.unstake(U256::from(pool_id), amount), "unstake").await
    }

    async fn submit_claim(&self, pool_id: u64) -> StakeResult<TxHandle> {
        let stake = self.stake_writer()?;
        self.send(stake.claim(U256::from(pool_id)), "claim").await
    }

    async fn submit_withdraw(&self, pool_id: u64) -> StakeResult<TxHandle> {
        let stake = self.stake_writer()?;
        self.send(stake.withdraw(U256::from(pool_id)), "withdraw").await
    }

    async fn submit_native_transfer(&self, to: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let signer = self.signer()?;
        let tx = TransactionRequest::new().to(to).value(amount);
        let pending = signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| StakeError::SubmissionFailed(e.to_string()))
            .tap_err(|e| error!("[ethers] send submission failed: {}", e))?;
        Ok(submitted(pending.tx_hash(), "send"))
    }

    async fn submit_token_transfer(
        &self,
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let erc20 = ERC20::new(token, self.signer()?);
        self.send(erc20.transfer(to, amount), "transfer").await
    }

    async fn submit_wrap(&self, weth: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let weth = WETH9::new(weth, self.signer()?);
        self.send(weth.deposit().value(amount), "wrap").await
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> StakeResult<ConfirmedTx> {
        let tx_hash = handle.tx_hash;
        let provider = self.provider.clone();
        let receipt = match poll_receipt(tx_hash, self.confirmation_timeout, || {
            let provider = provider.clone();
            async move {
                provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(StakeError::from)
            }
        })
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let known = self
                    .provider
                    .get_transaction(tx_hash)
                    .await
                    .map(|tx| tx.is_some())
                    .map_err(StakeError::from);
                return Err(reclassify_timeout(e, known));
            }
        };
        confirmed_tx(
            self.stake_contract,
            tx_hash,
            receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            receipt.block_number.map(|b| b.as_u64()),
            receipt.gas_used,
            &receipt.logs,
        )
        .tap_err(|e| error!("[ethers] {:?} not confirmed: {}", tx_hash, e))
    }
}
