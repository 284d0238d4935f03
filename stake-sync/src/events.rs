// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{MetaNodeStakeEvents, TransferFilter};
use crate::error::{StakeError, StakeResult};
use ethers::abi::RawLog;
use ethers::contract::EthLogDecode;
use ethers::types::{Address as EthAddress, Log, TxHash, H256, U256};
use serde::{Deserialize, Serialize};

/// Staking contract events found in a confirmed receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeEvent {
    Deposit {
        user: EthAddress,
        pool_id: U256,
        amount: U256,
    },
    RequestUnstake {
        user: EthAddress,
        pool_id: U256,
        amount: U256,
    },
    Withdraw {
        user: EthAddress,
        pool_id: U256,
        amount: U256,
        block_number: U256,
    },
    Claim {
        user: EthAddress,
        pool_id: U256,
        reward: U256,
    },
}

impl StakeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StakeEvent::Deposit { .. } => "Deposit",
            StakeEvent::RequestUnstake { .. } => "RequestUnstake",
            StakeEvent::Withdraw { .. } => "Withdraw",
            StakeEvent::Claim { .. } => "Claim",
        }
    }

    pub fn try_from_raw(topics: Vec<H256>, data: Vec<u8>) -> Option<Self> {
        let event = MetaNodeStakeEvents::decode_log(&RawLog { topics, data }).ok()?;
        Some(match event {
            MetaNodeStakeEvents::DepositFilter(e) => StakeEvent::Deposit {
                user: e.user,
                pool_id: e.pool_id,
                amount: e.amount,
            },
            MetaNodeStakeEvents::RequestUnstakeFilter(e) => StakeEvent::RequestUnstake {
                user: e.user,
                pool_id: e.pool_id,
                amount: e.amount,
            },
            MetaNodeStakeEvents::WithdrawFilter(e) => StakeEvent::Withdraw {
                user: e.user,
                pool_id: e.pool_id,
                amount: e.amount,
                block_number: e.block_number,
            },
            MetaNodeStakeEvents::ClaimFilter(e) => StakeEvent::Claim {
                user: e.user,
                pool_id: e.pool_id,
                reward: e.meta_node_reward,
            },
        })
    }
}

/// Decodes the logs emitted by `stake_contract`; foreign and unknown logs are skipped.
pub fn decode_stake_events(stake_contract: EthAddress, logs: &[Log]) -> Vec<StakeEvent> {
    logs.iter()
        .filter(|log| log.address == stake_contract)
        .filter_map(|log| StakeEvent::try_from_raw(log.topics.clone(), log.data.to_vec()))
        .collect()
}

/// An ERC-20 `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub token: EthAddress,
    pub from: EthAddress,
    pub to: EthAddress,
    pub value: U256,
    pub block_number: u64,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

/// Decodes `Transfer` logs queried for `token`. A log from any other address
/// means the node ignored the filter, so the whole range is rejected.
pub fn decode_transfer_events(token: EthAddress, logs: &[Log]) -> StakeResult<Vec<TransferEvent>> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        if log.removed == Some(true) {
            continue;
        }
        if log.address != token {
            return Err(StakeError::InvalidResponse(format!(
                "Log from unexpected address {:?}, expected {:?}",
                log.address, token
            )));
        }
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        let Ok(transfer) = TransferFilter::decode_log(&raw) else {
            continue;
        };
        let block_number = log.block_number.ok_or_else(|| {
            StakeError::InvalidResponse(format!(
                "Transfer log {:?} has no block number",
                log.transaction_hash
            ))
        })?;
        events.push(TransferEvent {
            token,
            from: transfer.from,
            to: transfer.to,
            value: transfer.value,
            block_number: block_number.as_u64(),
            tx_hash: log.transaction_hash,
            log_index: log.log_index.map(|i| i.as_u64()),
        });
    }
    Ok(events)
}
