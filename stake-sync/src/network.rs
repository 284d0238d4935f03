// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::Address as EthAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SEPOLIA_CHAIN_ID: u64 = 11155111;
pub const MAINNET_CHAIN_ID: u64 = 1;

const SEPOLIA_RPC_URL: &str = "https://eth-sepolia.g.alchemy.com/v2/mXqbqtme85tkvSUbAWZYV";
const MAINNET_RPC_URL: &str = "https://eth-mainnet.g.alchemy.com/v2/mXqbqtme85tkvSUbAWZYV";

const SEPOLIA_STAKE_CONTRACT: &str = "0x992d5eff130456a7791066ee4972357fd240c582";
// Not deployed on mainnet yet
const MAINNET_STAKE_CONTRACT: &str = "0x0000000000000000000000000000000000000000";

const SEPOLIA_TOKENS: &[(&str, &str)] = &[
    ("USDC", "0xaa8e23fb1079ea71e0a56f48a2aa51851d8433d0"),
    ("WETH", "0x7b79995e5f793a07bc00c21412e50ecae098e7f9"),
];
const MAINNET_TOKENS: &[(&str, &str)] = &[
    ("USDC", "0xdac17f958d2ee523a2206206994597c13d831ec7"),
    ("WETH", "0x7b79995e5f793a07bc00c21412e50ecae098e7f9"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Sepolia,
    Mainnet,
}

impl Network {
    /// Unknown chain ids fall back to Sepolia.
    pub fn from_chain_id(chain_id: u64) -> Self {
        match chain_id {
            MAINNET_CHAIN_ID => Network::Mainnet,
            _ => Network::Sepolia,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Sepolia => SEPOLIA_CHAIN_ID,
            Network::Mainnet => MAINNET_CHAIN_ID,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Sepolia => "Sepolia",
            Network::Mainnet => "Ethereum Mainnet",
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Sepolia => SEPOLIA_RPC_URL,
            Network::Mainnet => MAINNET_RPC_URL,
        }
    }

    pub fn stake_contract(&self) -> EthAddress {
        let raw = match self {
            Network::Sepolia => SEPOLIA_STAKE_CONTRACT,
            Network::Mainnet => MAINNET_STAKE_CONTRACT,
        };
        raw.parse().unwrap_or_else(|_| EthAddress::zero())
    }

    /// Well-known ERC-20 tokens on this network, by symbol.
    pub fn known_tokens(&self) -> Vec<(&'static str, EthAddress)> {
        let table = match self {
            Network::Sepolia => SEPOLIA_TOKENS,
            Network::Mainnet => MAINNET_TOKENS,
        };
        table
            .iter()
            .filter_map(|(symbol, address)| address.parse().ok().map(|a| (*symbol, a)))
            .collect()
    }

    pub fn known_token(&self, symbol: &str) -> Option<EthAddress> {
        self.known_tokens()
            .into_iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map(|(_, address)| address)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.chain_id())
    }
}

impl FromStr for Network {
    type Err = std::convert::Infallible;

    // Same fallback as `from_chain_id`: anything unrecognised is Sepolia
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "mainnet" | "ethereum" => Network::Mainnet,
            _ => Network::Sepolia,
        })
    }
}
