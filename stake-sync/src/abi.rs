// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract bindings generated from the JSON ABIs under `abi/`.

use crate::error::{StakeError, StakeResult};
use ethers::abi::Abi;
use ethers::contract::{abigen, BaseContract};
use std::sync::OnceLock;

abigen!(
    MetaNodeStake,
    "abi/MetaNodeStake.json",
    event_derives(serde::Deserialize, serde::Serialize)
);

abigen!(
    ERC20,
    "abi/ERC20.json",
    event_derives(serde::Deserialize, serde::Serialize)
);

/// Kept apart so its `deposit` binding does not clash with the staking one.
pub mod weth {
    ethers::contract::abigen!(WETH9, "abi/WETH9.json");
}

pub const META_NODE_STAKE_ABI_JSON: &str = include_str!("../abi/MetaNodeStake.json");
pub const ERC20_ABI_JSON: &str = include_str!("../abi/ERC20.json");
pub const WETH9_ABI_JSON: &str = include_str!("../abi/WETH9.json");

fn parse_abi(name: &str, json: &str) -> StakeResult<BaseContract> {
    let abi: Abi = serde_json::from_str(json)
        .map_err(|e| StakeError::InvalidConfig(format!("Malformed {} ABI: {}", name, e)))?;
    Ok(BaseContract::from(abi))
}

/// Function-name addressable view of the staking contract ABI.
pub fn stake_base_contract() -> StakeResult<&'static BaseContract> {
    static CONTRACT: OnceLock<BaseContract> = OnceLock::new();
    if let Some(contract) = CONTRACT.get() {
        return Ok(contract);
    }
    let contract = parse_abi("MetaNodeStake", META_NODE_STAKE_ABI_JSON)?;
    Ok(CONTRACT.get_or_init(|| contract))
}

pub fn erc20_base_contract() -> StakeResult<&'static BaseContract> {
    static CONTRACT: OnceLock<BaseContract> = OnceLock::new();
    if let Some(contract) = CONTRACT.get() {
        return Ok(contract);
    }
    let contract = parse_abi("ERC20", ERC20_ABI_JSON)?;
    Ok(CONTRACT.get_or_init(|| contract))
}

pub fn weth_base_contract() -> StakeResult<&'static BaseContract> {
    static CONTRACT: OnceLock<BaseContract> = OnceLock::new();
    if let Some(contract) = CONTRACT.get() {
        return Ok(contract);
    }
    let contract = parse_abi("WETH9", WETH9_ABI_JSON)?;
    Ok(CONTRACT.get_or_init(|| contract))
}
