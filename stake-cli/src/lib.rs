// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use clap::*;
use ethers::types::{Address as EthAddress, U256};
use ethers::utils::{format_units, parse_units};
use stake_sync::config::{ResolvedConfig, StakeSyncConfig};
use stake_sync::events::TransferEvent;
use stake_sync::network::Network;
use stake_sync::types::{SyncSnapshot, TokenInfo, TokenMetadata};
use stake_sync::BackendKind;
use stake_sync_config::Config;
use std::fmt::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
pub struct Args {
    // Missing file means built-in defaults
    #[clap(long = "config-path", global = true)]
    pub config_path: Option<PathBuf>,
    #[clap(long = "backend", global = true)]
    pub backend: Option<BackendKind>,
    #[clap(long = "chain-id", global = true)]
    pub chain_id: Option<u64>,
    #[clap(long = "pool-id", global = true)]
    pub pool_id: Option<u64>,
    #[clap(subcommand)]
    pub command: StakeCommand,
}

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
pub enum StakeCommand {
    #[clap(name = "create-config-template")]
    CreateConfigTemplate { path: PathBuf },
    /// Contract-wide parameters
    #[clap(name = "overview")]
    Overview,
    /// One refresh of the selected pool
    #[clap(name = "pool")]
    Pool,
    /// Poll the selected pool and print every snapshot
    #[clap(name = "watch")]
    Watch {
        // Stop after this many snapshots
        #[clap(long = "count")]
        count: Option<u64>,
    },
    #[clap(name = "approve")]
    Approve { amount: String },
    #[clap(name = "stake")]
    Stake {
        amount: String,
        // Approve first when the allowance is too small
        #[clap(long = "approve", default_value = "false")]
        approve: bool,
    },
    #[clap(name = "unstake")]
    Unstake { amount: String },
    #[clap(name = "claim")]
    Claim,
    #[clap(name = "withdraw")]
    Withdraw,
    /// Native balance of an address, the configured wallet by default
    #[clap(name = "balance")]
    Balance {
        #[clap(long = "address")]
        address: Option<String>,
    },
    /// Send native currency
    #[clap(name = "send")]
    Send { to: String, amount: String },
    /// ERC-20 transfer; the token is a known symbol or an address
    #[clap(name = "transfer")]
    Transfer {
        token: String,
        to: String,
        amount: String,
    },
    #[clap(name = "token-info")]
    TokenInfo { token: String },
    /// Wrap native currency through the token's `deposit()`
    #[clap(name = "wrap")]
    Wrap {
        amount: String,
        #[clap(long = "token", default_value = "WETH")]
        token: String,
    },
    /// ERC-20 Transfer logs of a token
    #[clap(name = "events")]
    Events {
        token: String,
        // Keep polling for new blocks
        #[clap(long = "follow", default_value = "false")]
        follow: bool,
        #[clap(long = "from-block")]
        from_block: Option<u64>,
        // Stop after this many events
        #[clap(long = "count")]
        count: Option<u64>,
    },
}

/// Loads the config file (or defaults) and applies command line overrides.
pub fn load_config(args: &Args) -> anyhow::Result<ResolvedConfig> {
    let mut config = match &args.config_path {
        Some(path) => StakeSyncConfig::load(path)?,
        None => StakeSyncConfig::default(),
    };
    if let Some(chain_id) = args.chain_id {
        config.chain_id = chain_id;
    }
    if let Some(pool_id) = args.pool_id {
        config.pool_id = pool_id;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    info!(
        "Using {} backend on chain {} pool {}",
        config.backend, config.chain_id, config.pool_id
    );
    config.validate()
}

pub fn parse_amount(amount: &str, decimals: u8) -> anyhow::Result<U256> {
    let parsed = parse_units(amount.trim(), decimals as u32)
        .map_err(|e| anyhow!("Invalid amount '{}': {}", amount, e))?;
    Ok(parsed.into())
}

pub fn format_amount(amount: U256, decimals: u8) -> String {
    format_units(amount, decimals as u32).unwrap_or_else(|_| amount.to_string())
}

/// `amount` in `token` units followed by its symbol
pub fn format_token_amount(amount: U256, token: &TokenMetadata) -> String {
    format!("{} {}", format_amount(amount, token.decimals), token.symbol)
}

pub fn parse_address(value: &str) -> anyhow::Result<EthAddress> {
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid address '{}': {}", value, e))
}

/// A known token symbol of `network`, or a plain address.
pub fn resolve_token(network: Network, value: &str) -> anyhow::Result<EthAddress> {
    match network.known_token(value.trim()) {
        Some(address) => Ok(address),
        None => parse_address(value).map_err(|_| {
            anyhow!(
                "'{}' is neither an address nor a known token on {}",
                value,
                network
            )
        }),
    }
}

pub fn render_token_info(info: &TokenInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "token:           {:?}", info.address);
    let _ = writeln!(out, "name:            {}", info.name);
    let _ = writeln!(out, "symbol:          {}", info.symbol);
    let _ = writeln!(out, "decimals:        {}", info.decimals);
    let _ = writeln!(
        out,
        "total supply:    {} {}",
        format_amount(info.total_supply, info.decimals),
        info.symbol
    );
    if let Some(balance) = info.holder_balance {
        let _ = writeln!(
            out,
            "balance:         {} {}",
            format_amount(balance, info.decimals),
            info.symbol
        );
    }
    out
}

pub fn render_transfer(event: &TransferEvent, token: &TokenMetadata) -> String {
    format!(
        "block {}: {:?} -> {:?} {}",
        event.block_number,
        event.from,
        event.to,
        format_token_amount(event.value, token)
    )
}

pub fn render_snapshot(snapshot: &SyncSnapshot, token: &TokenMetadata) -> String {
    let mut out = String::new();
    let amount = |v: U256| format_token_amount(v, token);
    let _ = writeln!(out, "block:           {}", snapshot.cursor.current_block_height);
    match &snapshot.pool {
        Some(pool) => {
            let _ = writeln!(out, "pool:            {}", pool.pool_id);
            let _ = writeln!(out, "stake token:     {:?}", pool.stake_token);
            let _ = writeln!(out, "pool weight:     {}", pool.pool_weight);
            let _ = writeln!(out, "total staked:    {}", amount(pool.total_staked));
            let _ = writeln!(out, "min deposit:     {}", amount(pool.min_deposit));
            let _ = writeln!(out, "unstake lock:    {} blocks", pool.unstake_lock_blocks);
        }
        None => {
            let _ = writeln!(out, "pool:            not loaded");
        }
    }
    if let Some(address) = snapshot.account.active_address() {
        let position = &snapshot.position;
        let withdrawal = &snapshot.withdrawal;
        let _ = writeln!(out, "account:         {:?}", address);
        let _ = writeln!(out, "staked:          {}", amount(position.staked_balance));
        let _ = writeln!(out, "wallet balance:  {}", amount(position.wallet_balance));
        if snapshot.pool.as_ref().is_some_and(|p| !p.is_native()) {
            let _ = writeln!(out, "allowance:       {}", amount(position.allowance));
        }
        let _ = writeln!(
            out,
            "pending reward:  {}",
            format_amount(position.pending_reward, 18)
        );
        let _ = writeln!(
            out,
            "withdrawable:    {}",
            amount(withdrawal.unlocked_amount())
        );
        let _ = writeln!(out, "still locked:    {}", amount(withdrawal.locked_amount()));
    }
    out
}
