// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Declarative adapter: reads are declared as `(contract, function name, args)`
//! against the JSON ABI and sent as raw JSON-RPC batches. A whole refresh is
//! answered from one block.

use super::{
    confirmed_tx, poll_receipt, pool_from_record, reclassify_timeout, u256_to_u64, PoolRecord,
    RefreshReads, StakeAdapter,
};
use crate::abi::{erc20_base_contract, stake_base_contract, weth_base_contract, TransferFilter};
use crate::config::ResolvedConfig;
use crate::error::{StakeError, StakeResult};
use crate::events::{decode_transfer_events, TransferEvent};
use crate::metrics::StakeSyncMetrics;
use crate::types::{
    BackendKind, ConfirmedTx, PoolSnapshot, StakeToken, StakingOverview, TokenInfo, TokenMetadata,
    TxHandle, UserPosition, WithdrawRequestState,
};
use crate::wallet::WalletProvider;
use async_trait::async_trait;
use ethers::abi::{Detokenize, Tokenize};
use ethers::contract::{BaseContract, EthEvent};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address as EthAddress, Bytes, Log, Transaction, TransactionReceipt, TransactionRequest,
    TxHash, U256, U64,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tap::TapFallible;
use tracing::{debug, error, info, warn};
use url::Url;

const MAX_TRANSPORT_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

/// A contract read declared by function name.
#[derive(Debug, Clone)]
pub struct ContractQuery {
    address: EthAddress,
    abi: &'static BaseContract,
    function: &'static str,
    calldata: Bytes,
}

impl ContractQuery {
    pub fn new<T: Tokenize>(
        address: EthAddress,
        abi: &'static BaseContract,
        function: &'static str,
        args: T,
    ) -> StakeResult<Self> {
        let calldata = abi.encode(function, args).map_err(|e| {
            StakeError::InvalidConfig(format!("Cannot encode {}: {}", function, e))
        })?;
        Ok(Self {
            address,
            abi,
            function,
            calldata,
        })
    }

    fn to_request(&self, block: &str) -> (&'static str, Value) {
        (
            "eth_call",
            json!([{ "to": self.address, "data": self.calldata }, block]),
        )
    }

    fn decode<D: Detokenize>(&self, output: &Value) -> StakeResult<D> {
        let bytes: Bytes = from_value(output, self.function)?;
        self.abi
            .decode_output(self.function, bytes)
            .map_err(|e| StakeError::InvalidResponse(format!("{}: {}", self.function, e)))
    }
}

fn from_value<T: DeserializeOwned>(value: &Value, what: &str) -> StakeResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| StakeError::InvalidResponse(format!("{}: {}", what, e)))
}

fn block_tag(block: u64) -> String {
    format!("0x{:x}", block)
}

fn shared_http_client() -> StakeResult<reqwest::Client> {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(16)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| StakeError::InvalidConfig(format!("Cannot build http client: {}", e)))?;
    Ok(CLIENT.get_or_init(|| client).clone())
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("connection closed")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
        || msg.contains("unexpected eof")
}

/// Raw JSON-RPC over a shared `reqwest` client, with batching.
#[derive(Debug)]
pub struct BatchRpcClient {
    http_client: reqwest::Client,
    rpc_url: Url,
    request_id: AtomicU64,
    metrics: Arc<StakeSyncMetrics>,
}

impl BatchRpcClient {
    pub fn new(rpc_url: Url, metrics: Arc<StakeSyncMetrics>) -> StakeResult<Self> {
        Ok(Self {
            http_client: shared_http_client()?,
            rpc_url,
            request_id: AtomicU64::new(1),
            metrics,
        })
    }

    async fn post(&self, body: &Value) -> StakeResult<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = match self
                .http_client
                .post(self.rpc_url.clone())
                .json(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err)
                    if attempt < MAX_TRANSPORT_ATTEMPTS && is_transient_transport_error(&err) =>
                {
                    warn!(
                        "[batch-rpc] transport error (attempt {}/{}), retrying: {}",
                        attempt, MAX_TRANSPORT_ATTEMPTS, err
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                    continue;
                }
                Err(err) if is_transient_transport_error(&err) => {
                    self.metrics.eth_node_connected.set(0);
                    return Err(StakeError::TransientProviderError(err.to_string()));
                }
                Err(err) => {
                    self.metrics.eth_node_connected.set(0);
                    return Err(StakeError::ProviderError(err.to_string()));
                }
            };
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                self.metrics.eth_node_connected.set(0);
                return Err(StakeError::ProviderError(format!(
                    "HTTP error {}: {}",
                    status, text
                )));
            }
            self.metrics.eth_node_connected.set(1);
            return response
                .json::<Value>()
                .await
                .map_err(|e| StakeError::InvalidResponse(e.to_string()));
        }
    }

    /// Sends all `calls` in one HTTP request and returns the results in order.
    /// Any failed entry fails the whole batch.
    pub async fn batch(&self, calls: Vec<(&str, Value)>) -> StakeResult<Vec<Value>> {
        if calls.is_empty() {
            return Ok(vec![]);
        }
        let requests: Vec<JsonRpcRequest> = calls
            .into_iter()
            .map(|(method, params)| JsonRpcRequest {
                jsonrpc: "2.0",
                method: method.to_string(),
                params,
                id: self.request_id.fetch_add(1, Ordering::SeqCst),
            })
            .collect();
        for request in &requests {
            self.metrics
                .eth_rpc_queries
                .with_label_values(&[request.method.as_str()])
                .inc();
        }
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&["batch"])
            .start_timer();

        let body = serde_json::to_value(&requests)
            .map_err(|e| StakeError::Generic(format!("Cannot serialize batch: {}", e)))?;
        let raw = self.post(&body).await?;
        let responses: Vec<JsonRpcResponse> = match raw {
            Value::Array(_) => from_value(&raw, "batch response")?,
            // Nodes without batch support answer with a single error object
            other => {
                return Err(StakeError::InvalidResponse(format!(
                    "Expected a batch response, got {}",
                    other
                )))
            }
        };

        let mut by_id: HashMap<u64, JsonRpcResponse> =
            responses.into_iter().map(|r| (r.id, r)).collect();
        let mut results = Vec::with_capacity(requests.len());
        for request in &requests {
            let response = by_id.remove(&request.id).ok_or_else(|| {
                StakeError::InvalidResponse(format!("Missing response for {}", request.method))
            })?;
            if let Some(error) = response.error {
                return Err(StakeError::ProviderError(format!(
                    "{} failed with {}: {}",
                    request.method, error.code, error.message
                )));
            }
            results.push(response.result.unwrap_or(Value::Null));
        }
        Ok(results)
    }

    pub async fn call(&self, method: &str, params: Value) -> StakeResult<Value> {
        let mut results = self.batch(vec![(method, params)]).await?;
        results
            .pop()
            .ok_or_else(|| StakeError::InvalidResponse(format!("Empty response for {}", method)))
    }

    pub async fn block_number(&self) -> StakeResult<u64> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        Ok(from_value::<U64>(&value, "eth_blockNumber")?.as_u64())
    }
}

pub struct BatchRpcStakeAdapter {
    client: BatchRpcClient,
    wallet: Option<Arc<dyn WalletProvider>>,
    stake_contract: EthAddress,
    confirmation_timeout: Duration,
}

impl BatchRpcStakeAdapter {
    pub fn new(config: &ResolvedConfig, metrics: Arc<StakeSyncMetrics>) -> StakeResult<Self> {
        Ok(Self::with_client(
            BatchRpcClient::new(config.rpc_url.clone(), metrics)?,
            config.stake_contract,
            config.wallet.clone(),
            config.confirmation_timeout,
        ))
    }

    pub fn with_client(
        client: BatchRpcClient,
        stake_contract: EthAddress,
        wallet: Option<Arc<dyn WalletProvider>>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            client,
            wallet,
            stake_contract,
            confirmation_timeout,
        }
    }

    fn stake_query<T: Tokenize>(
        &self,
        function: &'static str,
        args: T,
    ) -> StakeResult<ContractQuery> {
        ContractQuery::new(self.stake_contract, stake_base_contract()?, function, args)
    }

    fn erc20_query<T: Tokenize>(
        &self,
        token: EthAddress,
        function: &'static str,
        args: T,
    ) -> StakeResult<ContractQuery> {
        ContractQuery::new(token, erc20_base_contract()?, function, args)
    }

    /// The user-position reads, in the order `decode_position` expects.
    fn position_requests(
        &self,
        pid: U256,
        account: EthAddress,
        token: StakeToken,
        block: &str,
    ) -> StakeResult<Vec<(&'static str, Value)>> {
        let mut requests = vec![
            self.stake_query("stakingBalance", (pid, account))?
                .to_request(block),
            self.stake_query("pendingMetaNode", (pid, account))?
                .to_request(block),
        ];
        match token {
            StakeToken::Native => {
                requests.push(("eth_getBalance", json!([account, block])));
            }
            StakeToken::Erc20(token) => {
                requests.push(self.erc20_query(token, "balanceOf", account)?.to_request(block));
                requests.push(
                    self.erc20_query(token, "allowance", (account, self.stake_contract))?
                        .to_request(block),
                );
            }
        }
        Ok(requests)
    }

    fn decode_position(
        &self,
        pid: U256,
        account: EthAddress,
        token: StakeToken,
        results: &[Value],
    ) -> StakeResult<UserPosition> {
        let staked_balance = self
            .stake_query("stakingBalance", (pid, account))?
            .decode(&results[0])?;
        let pending_reward = self
            .stake_query("pendingMetaNode", (pid, account))?
            .decode(&results[1])?;
        let (wallet_balance, allowance) = match token {
            StakeToken::Native => (
                from_value::<U256>(&results[2], "eth_getBalance")?,
                U256::zero(),
            ),
            StakeToken::Erc20(token) => (
                self.erc20_query(token, "balanceOf", account)?
                    .decode(&results[2])?,
                self.erc20_query(token, "allowance", (account, self.stake_contract))?
                    .decode(&results[3])?,
            ),
        };
        Ok(UserPosition {
            staked_balance,
            wallet_balance,
            allowance,
            pending_reward,
        })
    }

    fn decode_withdraw(
        &self,
        query: &ContractQuery,
        result: &Value,
    ) -> StakeResult<WithdrawRequestState> {
        let (requested, unlocked): (U256, U256) = query.decode(result)?;
        WithdrawRequestState::new(requested, unlocked)
    }

    fn wallet(&self) -> StakeResult<&Arc<dyn WalletProvider>> {
        self.wallet.as_ref().ok_or(StakeError::WalletUnavailable)
    }

    /// Fills, signs locally and broadcasts a legacy transaction.
    async fn send_transaction(
        &self,
        to: EthAddress,
        calldata: Bytes,
        value: U256,
        label: &str,
    ) -> StakeResult<TxHandle> {
        let wallet = self.wallet()?;
        let from = wallet.address();
        let tx = TransactionRequest::new()
            .from(from)
            .to(to)
            .data(calldata)
            .value(value)
            .chain_id(wallet.chain_id());

        let fill = self
            .client
            .batch(vec![
                ("eth_getTransactionCount", json!([from, "pending"])),
                ("eth_gasPrice", json!([])),
                ("eth_estimateGas", json!([tx])),
            ])
            .await
            .map_err(|e| StakeError::SubmissionFailed(e.to_string()))
            .tap_err(|e| error!("[batch-rpc] {} could not be prepared: {}", label, e))?;
        let nonce: U256 = from_value(&fill[0], "eth_getTransactionCount")?;
        let gas_price: U256 = from_value(&fill[1], "eth_gasPrice")?;
        let gas: U256 = from_value(&fill[2], "eth_estimateGas")?;

        let typed: TypedTransaction = tx.nonce(nonce).gas_price(gas_price).gas(gas).into();
        let signature = wallet
            .local_wallet()
            .sign_transaction_sync(&typed)
            .map_err(|e| StakeError::SubmissionFailed(format!("Signing failed: {}", e)))?;
        let raw = typed.rlp_signed(&signature);

        let result = self
            .client
            .call("eth_sendRawTransaction", json!([raw]))
            .await
            .map_err(|e| StakeError::SubmissionFailed(e.to_string()))
            .tap_err(|e| error!("[batch-rpc] {} submission failed: {}", label, e))?;
        let tx_hash: TxHash = from_value(&result, "eth_sendRawTransaction")?;
        info!("[batch-rpc] {} submitted: {:?}", label, tx_hash);
        Ok(TxHandle {
            tx_hash,
            backend: BackendKind::BatchRpc,
        })
    }

    async fn send_to_stake<T: Tokenize>(
        &self,
        function: &'static str,
        args: T,
        value: U256,
    ) -> StakeResult<TxHandle> {
        let query = self.stake_query(function, args)?;
        self.send_transaction(self.stake_contract, query.calldata, value, function).await
    }
}

#[async_trait]
impl StakeAdapter for BatchRpcStakeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::BatchRpc
    }

    fn stake_contract(&self) -> EthAddress {
        self.stake_contract
    }

    fn signer_address(&self) -> Option<EthAddress> {
        self.wallet.as_ref().map(|w| w.address())
    }

    async fn read_pool(&self, pool_id: u64) -> StakeResult<PoolSnapshot> {
        let query = self.stake_query("pool", U256::from(pool_id))?;
        let (method, params) = query.to_request("latest");
        let result = self.client.call(method, params).await?;
        let record: PoolRecord = query.decode(&result)?;
        Ok(pool_from_record(pool_id, record))
    }

    async fn read_user_position(
        &self,
        pool_id: u64,
        account: EthAddress,
        token: StakeToken,
    ) -> StakeResult<UserPosition> {
        let pid = U256::from(pool_id);
        let requests = self.position_requests(pid, account, token, "latest")?;
        let results = self.client.batch(requests).await?;
        self.decode_position(pid, account, token, &results)
    }

    async fn read_withdraw_state(
        &self,
        pool_id: u64,
        account: EthAddress,
    ) -> StakeResult<WithdrawRequestState> {
        let query = self.stake_query("withdrawAmount", (U256::from(pool_id), account))?;
        let (method, params) = query.to_request("latest");
        let result = self.client.call(method, params).await?;
        self.decode_withdraw(&query, &result)
    }

    async fn read_block_height(&self) -> StakeResult<u64> {
        self.client.block_number().await
    }

    async fn read_chain_id(&self) -> StakeResult<u64> {
        let value = self.client.call("eth_chainId", json!([])).await?;
        Ok(from_value::<U64>(&value, "eth_chainId")?.as_u64())
    }

    async fn read_overview(&self) -> StakeResult<StakingOverview> {
        let functions = [
            "poolLength",
            "startBlock",
            "endBlock",
            "MetaNodePerBlock",
            "totalPoolWeight",
        ];
        let queries = functions
            .into_iter()
            .map(|f| self.stake_query(f, ()))
            .collect::<StakeResult<Vec<_>>>()?;
        let results = self
            .client
            .batch(queries.iter().map(|q| q.to_request("latest")).collect())
            .await?;
        let values = queries
            .iter()
            .zip(results.iter())
            .map(|(q, r)| q.decode::<U256>(r))
            .collect::<StakeResult<Vec<_>>>()?;
        Ok(StakingOverview {
            pool_count: u256_to_u64(values[0], "pool length")?,
            start_block: values[1],
            end_block: values[2],
            reward_per_block: values[3],
            total_pool_weight: values[4],
        })
    }

    async fn read_token_metadata(&self, token: StakeToken) -> StakeResult<TokenMetadata> {
        let StakeToken::Erc20(address) = token else {
            return Ok(TokenMetadata::native());
        };
        let symbol = self.erc20_query(address, "symbol", ())?;
        let decimals = self.erc20_query(address, "decimals", ())?;
        let results = self
            .client
            .batch(vec![symbol.to_request("latest"), decimals.to_request("latest")])
            .await?;
        Ok(TokenMetadata {
            symbol: symbol.decode(&results[0])?,
            decimals: decimals.decode(&results[1])?,
        })
    }

    async fn read_native_balance(&self, address: EthAddress) -> StakeResult<U256> {
        let value = self
            .client
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        from_value(&value, "eth_getBalance")
    }

    async fn read_token_info(
        &self,
        token: EthAddress,
        holder: Option<EthAddress>,
    ) -> StakeResult<TokenInfo> {
        let mut queries = vec![
            self.erc20_query(token, "name", ())?,
            self.erc20_query(token, "symbol", ())?,
            self.erc20_query(token, "decimals", ())?,
            self.erc20_query(token, "totalSupply", ())?,
        ];
        if let Some(holder) = holder {
            queries.push(self.erc20_query(token, "balanceOf", holder)?);
        }
        let results = self
            .client
            .batch(queries.iter().map(|q| q.to_request("latest")).collect())
            .await?;
        let holder_balance = match queries.get(4) {
            Some(query) => Some(query.decode(&results[4])?),
            None => None,
        };
        Ok(TokenInfo {
            address: token,
            name: queries[0].decode(&results[0])?,
            symbol: queries[1].decode(&results[1])?,
            decimals: queries[2].decode(&results[2])?,
            total_supply: queries[3].decode(&results[3])?,
            holder_balance,
        })
    }

    async fn read_transfer_events(
        &self,
        token: EthAddress,
        from_block: u64,
        to_block: u64,
    ) -> StakeResult<Vec<TransferEvent>> {
        let filter = json!({
            "address": token,
            "topics": [TransferFilter::signature()],
            "fromBlock": block_tag(from_block),
            "toBlock": block_tag(to_block),
        });
        let value = self.client.call("eth_getLogs", json!([filter])).await?;
        let logs: Vec<Log> = from_value(&value, "eth_getLogs")?;
        decode_transfer_events(token, &logs)
    }

    /// One `eth_blockNumber`, then every read of the refresh in one batch
    /// pinned to that block.
    async fn read_refresh(
        &self,
        pool_id: u64,
        account: Option<EthAddress>,
        token: StakeToken,
    ) -> StakeResult<RefreshReads> {
        let block_height = self.client.block_number().await?;
        let block = block_tag(block_height);
        let pid = U256::from(pool_id);

        let pool_query = self.stake_query("pool", pid)?;
        let mut requests = vec![pool_query.to_request(&block)];
        let withdraw_query = match account {
            Some(account) => {
                let query = self.stake_query("withdrawAmount", (pid, account))?;
                requests.push(query.to_request(&block));
                requests.extend(self.position_requests(pid, account, token, &block)?);
                Some((account, query))
            }
            None => None,
        };
        debug!(
            "[batch-rpc] refreshing pool {} with {} calls at block {}",
            pool_id,
            requests.len(),
            block_height
        );
        let results = self.client.batch(requests).await?;

        let record: PoolRecord = pool_query.decode(&results[0])?;
        let (position, withdrawal) = match withdraw_query {
            Some((account, query)) => (
                self.decode_position(pid, account, token, &results[2..])?,
                self.decode_withdraw(&query, &results[1])?,
            ),
            None => (UserPosition::default(), WithdrawRequestState::default()),
        };
        Ok(RefreshReads {
            pool: pool_from_record(pool_id, record),
            position,
            withdrawal,
            block_height,
        })
    }

    async fn submit_approve(
        &self,
        token: EthAddress,
        spender: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let query = self.erc20_query(token, "approve", (spender, amount))?;
        self.send_transaction(token, query.calldata, U256::zero(), "approve").await
    }

    async fn submit_native_deposit(&self, amount: U256) -> StakeResult<TxHandle> {
        self.send_to_stake("depositETH", (), amount).await
    }

    async fn submit_token_deposit(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle> {
        self.send_to_stake("deposit", (U256::from(pool_id), amount), U256::zero()).await
    }

    async fn submit_unstake(&self, pool_id: u64, amount: U256) -> StakeResult<TxHandle> {
        self.send_to_stake("unstake", (U256::from(pool_id), amount), U256::zero()).await
    }

    async fn submit_claim(&self, pool_id: u64) -> StakeResult<TxHandle> {
        self.send_to_stake("claim", U256::from(pool_id), U256::zero()).await
    }

    async fn submit_withdraw(&self, pool_id: u64) -> StakeResult<TxHandle> {
        self.send_to_stake("withdraw", U256::from(pool_id), U256::zero()).await
    }

    async fn submit_native_transfer(&self, to: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        self.send_transaction(to, Bytes::new(), amount, "send").await
    }

    async fn submit_token_transfer(
        &self,
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let query = self.erc20_query(token, "transfer", (to, amount))?;
        self.send_transaction(token, query.calldata, U256::zero(), "transfer").await
    }

    async fn submit_wrap(&self, weth: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let query = ContractQuery::new(weth, weth_base_contract()?, "deposit", ())?;
        self.send_transaction(weth, query.calldata, amount, "wrap").await
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> StakeResult<ConfirmedTx> {
        let tx_hash = handle.tx_hash;
        let client = &self.client;
        let receipt = match poll_receipt(tx_hash, self.confirmation_timeout, || async move {
            let value = client
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            from_value::<Option<TransactionReceipt>>(&value, "eth_getTransactionReceipt")
        })
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let known = match client
                    .call("eth_getTransactionByHash", json!([tx_hash]))
                    .await
                {
                    Ok(value) => {
                        from_value::<Option<Transaction>>(&value, "eth_getTransactionByHash")
                            .map(|tx| tx.is_some())
                    }
                    Err(e) => Err(e),
                };
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
        .tap_err(|e| error!("[batch-rpc] {:?} not confirmed: {}", tx_hash, e))
    }
}
