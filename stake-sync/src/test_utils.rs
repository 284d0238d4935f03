// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{DepositFilter, PoolCall, TransferFilter};
use crate::adapter::{PoolRecord, RefreshReads, StakeAdapter};
use crate::error::{ConfirmationFailure, StakeError, StakeResult};
use crate::eth_mock_provider::EthMockProvider;
use crate::events::{StakeEvent, TransferEvent};
use crate::types::{
    BackendKind, ConfirmedTx, PoolSnapshot, StakeToken, StakingOverview, TokenInfo, TokenMetadata,
    TxHandle, UserPosition, WithdrawRequestState,
};
use crate::wallet::{LocalKeyWallet, WalletProvider};
use async_trait::async_trait;
use ethers::abi::{encode, AbiEncode, Token};
use ethers::contract::EthEvent;
use ethers::types::{
    Address as EthAddress, Bytes, Log, TransactionReceipt, TxHash, H256, U256, U64,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

pub const TEST_CHAIN_ID: u64 = 11155111;

/// Well known anvil development key, never funded outside local chains.
pub const DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn dev_wallet() -> Arc<dyn WalletProvider> {
    Arc::new(LocalKeyWallet::from_hex(DEV_PRIVATE_KEY, TEST_CHAIN_ID).unwrap())
}

pub fn test_pool_record(stake_token: EthAddress) -> PoolRecord {
    (
        stake_token,
        U256::from(500u64),
        U256::from(90u64),
        U256::from(12u64),
        U256::from(1000u64),
        U256::from(10u64),
        U256::from(20u64),
    )
}

pub fn test_refresh_reads(n: u64, block_height: u64) -> RefreshReads {
    let (stake_token, pool_weight, last_reward_block, acc, _, min_deposit, lock) =
        test_pool_record(EthAddress::zero());
    RefreshReads {
        pool: PoolSnapshot {
            pool_id: 0,
            stake_token: StakeToken::from_address(stake_token),
            pool_weight,
            last_reward_block,
            acc_reward_per_share: acc,
            total_staked: U256::from(n),
            min_deposit,
            unstake_lock_blocks: lock,
        },
        position: UserPosition {
            staked_balance: U256::from(n),
            wallet_balance: U256::from(1000u64),
            allowance: U256::zero(),
            pending_reward: U256::from(n * 10),
        },
        withdrawal: WithdrawRequestState::new(U256::from(n * 2), U256::from(n)).unwrap(),
        block_height,
    }
}

pub fn mock_pool_response(
    mock: &EthMockProvider,
    stake_contract: EthAddress,
    pool_id: u64,
    record: PoolRecord,
) {
    mock.add_call_response(
        stake_contract,
        PoolCall {
            pid: U256::from(pool_id),
        }
        .encode(),
        Bytes::from(record.encode()),
    );
}

/// Answers the nonce, gas and broadcast requests a legacy send makes.
pub fn mock_write_path(mock: &EthMockProvider, tx_hash: TxHash) {
    mock.add_method_response("eth_chainId", U64::from(TEST_CHAIN_ID));
    mock.add_method_response("eth_getTransactionCount", U256::zero());
    mock.add_method_response("eth_gasPrice", U256::from(1_000_000_000u64));
    mock.add_method_response("eth_estimateGas", U256::from(100_000u64));
    mock.add_method_response("eth_sendRawTransaction", tx_hash);
}

pub fn test_deposit_log(contract: EthAddress, user: EthAddress, pool_id: u64, amount: u64) -> Log {
    Log {
        address: contract,
        topics: vec![
            DepositFilter::signature(),
            H256::from(user),
            H256::from_low_u64_be(pool_id),
        ],
        data: encode(&[Token::Uint(U256::from(amount))]).into(),
        ..Default::default()
    }
}

/// A mined ERC-20 `Transfer` log at `block`.
pub fn test_transfer_log(
    token: EthAddress,
    from: EthAddress,
    to: EthAddress,
    value: u64,
    block: u64,
) -> Log {
    Log {
        address: token,
        topics: vec![TransferFilter::signature(), H256::from(from), H256::from(to)],
        data: encode(&[Token::Uint(U256::from(value))]).into(),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(TxHash::from_low_u64_be(block)),
        log_index: Some(U256::zero()),
        ..Default::default()
    }
}

/// A mined receipt at block 42 carrying one `Deposit` log.
pub fn mock_receipt(
    mock: &EthMockProvider,
    tx_hash: TxHash,
    stake_contract: EthAddress,
    user: EthAddress,
    success: bool,
) {
    let receipt = TransactionReceipt {
        transaction_hash: tx_hash,
        block_number: Some(U64::from(42)),
        gas_used: Some(U256::from(21_000u64)),
        status: Some(U64::from(success as u64)),
        logs: vec![test_deposit_log(stake_contract, user, 0, 1000)],
        ..Default::default()
    };
    mock.add_response("eth_getTransactionReceipt", [tx_hash], receipt)
        .unwrap();
}

type RpcHandler = dyn Fn(&str, &Value) -> Value + Send + Sync;

/// Local HTTP JSON-RPC node. Every request is answered by `handler(method, params)`;
/// batch responses come back in reverse order so callers must match on ids.
pub struct JsonRpcStub {
    pub url: String,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    batches: Arc<AtomicUsize>,
}

impl JsonRpcStub {
    pub async fn start(handler: impl Fn(&str, &Value) -> Value + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests: Arc<Mutex<Vec<(String, Value)>>> = Default::default();
        let batches: Arc<AtomicUsize> = Default::default();
        let handler: Arc<RpcHandler> = Arc::new(handler);
        let (seen, posts) = (requests.clone(), batches.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_rpc_connection(
                    stream,
                    handler.clone(),
                    seen.clone(),
                    posts.clone(),
                ));
            }
        });
        Self {
            url,
            requests,
            batches,
        }
    }

    /// `(method, params)` of every request received, in arrival order
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|(m, _)| m).collect()
    }

    /// Number of HTTP posts received
    pub fn post_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

async fn serve_rpc_connection(
    stream: TcpStream,
    handler: Arc<RpcHandler>,
    seen: Arc<Mutex<Vec<(String, Value)>>>,
    posts: Arc<AtomicUsize>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await.unwrap();
        posts.fetch_add(1, Ordering::SeqCst);

        let answer = |request: &Value| {
            let method = request["method"].as_str().unwrap_or_default().to_string();
            let params = request["params"].clone();
            let result = handler(&method, &params);
            seen.lock().unwrap().push((method, params));
            json!({ "jsonrpc": "2.0", "id": request["id"], "result": result })
        };
        let request: Value = serde_json::from_slice(&body).unwrap();
        let response = match &request {
            Value::Array(requests) => {
                let mut answers: Vec<Value> = requests.iter().map(answer).collect();
                answers.reverse();
                Value::Array(answers)
            }
            single => answer(single),
        };
        let payload = response.to_string();
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
            payload.len()
        );
        let stream = reader.get_mut();
        if stream.write_all(head.as_bytes()).await.is_err()
            || stream.write_all(payload.as_bytes()).await.is_err()
        {
            return;
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    pool_tokens: HashMap<u64, EthAddress>,
    block_height: Option<u64>,
    withdraw_override: Option<(U256, U256)>,
    allowance: U256,
    approves: Vec<(EthAddress, EthAddress, U256)>,
    confirmation_failure: Option<ConfirmationFailure>,
    read_gate: Option<Arc<Notify>>,
    confirmation_gate: Option<Arc<Notify>>,
    native_balance: Option<U256>,
    token_balance: U256,
    transfer_events: Vec<TransferEvent>,
    transfer_queries: Vec<(u64, u64)>,
    // (token, recipient, amount); token is None for native sends
    transfers: Vec<(Option<EthAddress>, EthAddress, U256)>,
    wraps: Vec<(EthAddress, U256)>,
}

/// Scripted adapter. Every read returns values derived from how many
/// times that read has been made, so the n-th refresh is recognisable.
#[derive(Debug)]
pub struct MockStakeAdapter {
    signer: EthAddress,
    stake_contract: EthAddress,
    chain_id: u64,
    state: Mutex<MockState>,
    fail_reads: AtomicBool,
    fail_submissions: AtomicBool,
    pool_reads: AtomicUsize,
    position_reads: AtomicUsize,
    withdraw_reads: AtomicUsize,
    block_reads: AtomicUsize,
    native_deposits: AtomicUsize,
    token_deposits: AtomicUsize,
    unstakes: AtomicUsize,
    claims: AtomicUsize,
    withdraws: AtomicUsize,
    transfers: AtomicUsize,
    submissions: AtomicUsize,
}

impl MockStakeAdapter {
    pub fn new() -> Self {
        Self {
            signer: EthAddress::repeat_byte(0x11),
            stake_contract: EthAddress::repeat_byte(0x5e),
            chain_id: TEST_CHAIN_ID,
            state: Mutex::new(MockState::default()),
            fail_reads: AtomicBool::new(false),
            fail_submissions: AtomicBool::new(false),
            pool_reads: AtomicUsize::new(0),
            position_reads: AtomicUsize::new(0),
            withdraw_reads: AtomicUsize::new(0),
            block_reads: AtomicUsize::new(0),
            native_deposits: AtomicUsize::new(0),
            token_deposits: AtomicUsize::new(0),
            unstakes: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
            withdraws: AtomicUsize::new(0),
            transfers: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn signer(&self) -> EthAddress {
        self.signer
    }

    pub fn set_pool_token(&self, pool_id: u64, token: EthAddress) {
        self.state.lock().unwrap().pool_tokens.insert(pool_id, token);
    }

    pub fn set_block_height(&self, height: u64) {
        self.state.lock().unwrap().block_height = Some(height);
    }

    pub fn set_withdraw_amounts(&self, requested: U256, unlocked: U256) {
        self.state.lock().unwrap().withdraw_override = Some((requested, unlocked));
    }

    pub fn set_allowance(&self, allowance: U256) {
        self.state.lock().unwrap().allowance = allowance;
    }

    pub fn set_confirmation_failure(&self, failure: Option<ConfirmationFailure>) {
        self.state.lock().unwrap().confirmation_failure = failure;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Holds every `read_pool` until the returned handle is notified.
    pub fn gate_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().read_gate = Some(gate.clone());
        gate
    }

    /// Holds every confirmation until the returned handle is notified.
    pub fn gate_confirmation(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().confirmation_gate = Some(gate.clone());
        gate
    }

    pub fn pool_read_count(&self) -> usize {
        self.pool_reads.load(Ordering::SeqCst)
    }

    pub fn position_read_count(&self) -> usize {
        self.position_reads.load(Ordering::SeqCst)
    }

    pub fn withdraw_read_count(&self) -> usize {
        self.withdraw_reads.load(Ordering::SeqCst)
    }

    pub fn native_deposit_count(&self) -> usize {
        self.native_deposits.load(Ordering::SeqCst)
    }

    pub fn token_deposit_count(&self) -> usize {
        self.token_deposits.load(Ordering::SeqCst)
    }

    pub fn claim_count(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn approve_count(&self) -> usize {
        self.state.lock().unwrap().approves.len()
    }

    pub fn last_approve(&self) -> Option<(EthAddress, EthAddress, U256)> {
        self.state.lock().unwrap().approves.last().copied()
    }

    pub fn set_native_balance(&self, balance: U256) {
        self.state.lock().unwrap().native_balance = Some(balance);
    }

    pub fn set_token_balance(&self, balance: U256) {
        self.state.lock().unwrap().token_balance = balance;
    }

    pub fn push_transfer_event(&self, event: TransferEvent) {
        self.state.lock().unwrap().transfer_events.push(event);
    }

    /// Block ranges `read_transfer_events` was asked for, in order
    pub fn transfer_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().transfer_queries.clone()
    }

    pub fn sent_transfers(&self) -> Vec<(Option<EthAddress>, EthAddress, U256)> {
        self.state.lock().unwrap().transfers.clone()
    }

    pub fn wraps(&self) -> Vec<(EthAddress, U256)> {
        self.state.lock().unwrap().wraps.clone()
    }

    fn check_reads(&self) -> StakeResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StakeError::TransientProviderError(
                "mock read failure".to_string(),
            ));
        }
        Ok(())
    }

    fn submitted(&self, counter: &AtomicUsize) -> StakeResult<TxHandle> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(StakeError::SubmissionFailed("mock rejection".to_string()));
        }
        counter.fetch_add(1, Ordering::SeqCst);
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(TxHandle {
            tx_hash: TxHash::from_low_u64_be(n),
            backend: BackendKind::Ethers,
        })
    }
}

#[async_trait]
impl StakeAdapter for MockStakeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Ethers
    }

    fn stake_contract(&self) -> EthAddress {
        self.stake_contract
    }

    fn signer_address(&self) -> Option<EthAddress> {
        Some(self.signer)
    }

    async fn read_pool(&self, pool_id: u64) -> StakeResult<PoolSnapshot> {
        let n = self.pool_reads.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let (gate, token) = {
            let state = self.state.lock().unwrap();
            let token = state
                .pool_tokens
                .get(&pool_id)
                .copied()
                .unwrap_or_else(EthAddress::zero);
            (state.read_gate.clone(), token)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_reads()?;
        let mut pool = test_refresh_reads(n, 0).pool;
        pool.pool_id = pool_id;
        pool.stake_token = StakeToken::from_address(token);
        Ok(pool)
    }

    async fn read_user_position(
        &self,
        _pool_id: u64,
        _account: EthAddress,
        token: StakeToken,
    ) -> StakeResult<UserPosition> {
        let n = self.position_reads.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.check_reads()?;
        let mut position = test_refresh_reads(n, 0).position;
        if !token.is_native() {
            position.allowance = self.state.lock().unwrap().allowance;
        }
        Ok(position)
    }

    async fn read_withdraw_state(
        &self,
        _pool_id: u64,
        _account: EthAddress,
    ) -> StakeResult<WithdrawRequestState> {
        let n = self.withdraw_reads.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.check_reads()?;
        let overridden = self.state.lock().unwrap().withdraw_override;
        match overridden {
            Some((requested, unlocked)) => WithdrawRequestState::new(requested, unlocked),
            None => Ok(test_refresh_reads(n, 0).withdrawal),
        }
    }

    async fn read_block_height(&self) -> StakeResult<u64> {
        let n = self.block_reads.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.check_reads()?;
        Ok(self.state.lock().unwrap().block_height.unwrap_or(100 + n))
    }

    async fn read_chain_id(&self) -> StakeResult<u64> {
        Ok(self.chain_id)
    }

    async fn read_overview(&self) -> StakeResult<StakingOverview> {
        self.check_reads()?;
        Ok(StakingOverview {
            pool_count: 2,
            start_block: U256::from(1u64),
            end_block: U256::from(1_000_000u64),
            reward_per_block: U256::exp10(18),
            total_pool_weight: U256::from(1000u64),
        })
    }

    async fn read_token_metadata(&self, token: StakeToken) -> StakeResult<TokenMetadata> {
        self.check_reads()?;
        Ok(match token {
            StakeToken::Native => TokenMetadata::native(),
            StakeToken::Erc20(_) => TokenMetadata {
                symbol: "USDC".to_string(),
                decimals: 6,
            },
        })
    }

    async fn read_native_balance(&self, _address: EthAddress) -> StakeResult<U256> {
        self.check_reads()?;
        let balance = self.state.lock().unwrap().native_balance;
        Ok(balance.unwrap_or_else(|| U256::exp10(18)))
    }

    async fn read_token_info(
        &self,
        token: EthAddress,
        holder: Option<EthAddress>,
    ) -> StakeResult<TokenInfo> {
        self.check_reads()?;
        let balance = self.state.lock().unwrap().token_balance;
        Ok(TokenInfo {
            address: token,
            name: "USD Coin".to_string(),
            symbol: "USDC".to_string(),
            decimals: 6,
            total_supply: U256::from(1_000_000_000_000u64),
            holder_balance: holder.map(|_| balance),
        })
    }

    async fn read_transfer_events(
        &self,
        token: EthAddress,
        from_block: u64,
        to_block: u64,
    ) -> StakeResult<Vec<TransferEvent>> {
        self.check_reads()?;
        let mut state = self.state.lock().unwrap();
        state.transfer_queries.push((from_block, to_block));
        Ok(state
            .transfer_events
            .iter()
            .filter(|e| e.token == token && (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }

    async fn submit_approve(
        &self,
        token: EthAddress,
        spender: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(StakeError::SubmissionFailed("mock rejection".to_string()));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.approves.push((token, spender, amount));
            state.allowance = amount;
        }
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(TxHandle {
            tx_hash: TxHash::from_low_u64_be(n),
            backend: BackendKind::Ethers,
        })
    }

    async fn submit_native_deposit(&self, _amount: U256) -> StakeResult<TxHandle> {
        self.submitted(&self.native_deposits)
    }

    async fn submit_token_deposit(&self, _pool_id: u64, _amount: U256) -> StakeResult<TxHandle> {
        self.submitted(&self.token_deposits)
    }

    async fn submit_unstake(&self, _pool_id: u64, _amount: U256) -> StakeResult<TxHandle> {
        self.submitted(&self.unstakes)
    }

    async fn submit_claim(&self, _pool_id: u64) -> StakeResult<TxHandle> {
        self.submitted(&self.claims)
    }

    async fn submit_withdraw(&self, _pool_id: u64) -> StakeResult<TxHandle> {
        self.submitted(&self.withdraws)
    }

    async fn submit_native_transfer(&self, to: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let handle = self.submitted(&self.transfers)?;
        self.state.lock().unwrap().transfers.push((None, to, amount));
        Ok(handle)
    }

    async fn submit_token_transfer(
        &self,
        token: EthAddress,
        to: EthAddress,
        amount: U256,
    ) -> StakeResult<TxHandle> {
        let handle = self.submitted(&self.transfers)?;
        self.state
            .lock()
            .unwrap()
            .transfers
            .push((Some(token), to, amount));
        Ok(handle)
    }

    async fn submit_wrap(&self, weth: EthAddress, amount: U256) -> StakeResult<TxHandle> {
        let handle = self.submitted(&self.transfers)?;
        self.state.lock().unwrap().wraps.push((weth, amount));
        Ok(handle)
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> StakeResult<ConfirmedTx> {
        let (gate, failure) = {
            let state = self.state.lock().unwrap();
            (state.confirmation_gate.clone(), state.confirmation_failure)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(reason) = failure {
            return Err(StakeError::ConfirmationFailed {
                tx_hash: handle.tx_hash,
                reason,
            });
        }
        Ok(ConfirmedTx {
            tx_hash: handle.tx_hash,
            block_number: 42,
            gas_used: Some(U256::from(21_000u64)),
            events: vec![StakeEvent::Claim {
                user: self.signer,
                pool_id: U256::zero(),
                reward: U256::one(),
            }],
        })
    }
}
