// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use clap::*;
use stake_cli::{
    format_amount, format_token_amount, load_config, parse_address, parse_amount, render_snapshot,
    render_token_info, render_transfer, resolve_token, Args, StakeCommand,
};
use stake_sync::config::StakeSyncConfig;
use stake_sync::metrics::StakeSyncMetrics;
use stake_sync::types::{ConfirmedTx, SyncSnapshot, TokenMetadata};
use stake_sync::{FollowConfig, StakeSession, StakeSync};
use stake_sync_config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const FIRST_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);
// Blocks scanned by `events` without --from-block
const DEFAULT_EVENT_LOOKBACK: u64 = 1000;

async fn first_snapshot(sync: &StakeSync) -> anyhow::Result<SyncSnapshot> {
    let mut rx = sync.subscribe();
    wait_populated(&mut rx).await
}

async fn wait_populated(rx: &mut watch::Receiver<SyncSnapshot>) -> anyhow::Result<SyncSnapshot> {
    let snapshot = tokio::time::timeout(FIRST_SNAPSHOT_TIMEOUT, rx.wait_for(|s| s.is_populated()))
        .await
        .map_err(|_| anyhow!("No snapshot within {:?}", FIRST_SNAPSHOT_TIMEOUT))??
        .clone();
    Ok(snapshot)
}

fn print_confirmed(action: &str, confirmed: &ConfirmedTx) {
    println!(
        "{} confirmed in block {}: {:?}",
        action, confirmed.block_number, confirmed.tx_hash
    );
    for event in &confirmed.events {
        println!("  {:?}", event);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stake_sync::init_logging("info");
    let args = Args::parse();

    if let StakeCommand::CreateConfigTemplate { path } = &args.command {
        StakeSyncConfig::template().save(path)?;
        tracing::debug!("Stake sync config template generated at {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(StakeSyncMetrics::new(&registry));
    let mut session = StakeSession::new(config, metrics)?;

    match args.command {
        // Written above
        StakeCommand::CreateConfigTemplate { .. } => {}
        StakeCommand::Overview => {
            let overview = session.overview().await?;
            println!("backend:            {}", session.backend());
            println!("stake contract:     {:?}", session.adapter().stake_contract());
            println!("pools:              {}", overview.pool_count);
            println!("start block:        {}", overview.start_block);
            println!("end block:          {}", overview.end_block);
            println!(
                "reward per block:   {}",
                format_amount(overview.reward_per_block, 18)
            );
            println!("total pool weight:  {}", overview.total_pool_weight);
            for (symbol, address) in session.config().network.known_tokens() {
                println!("{:<20}{:?}", format!("{} token:", symbol), address);
            }
        }
        StakeCommand::Pool => {
            let sync = session.mount().await?;
            let token = sync.token();
            let snapshot = first_snapshot(sync).await?;
            let metadata = session.token_metadata(token).await?;
            print!("{}", render_snapshot(&snapshot, &metadata));
            if let Some(block) = snapshot.unlock_block_estimate() {
                println!("an unstake now unlocks around block {}", block);
            }
        }
        StakeCommand::Watch { count } => {
            let token = session.mount().await?.token();
            let metadata = session.token_metadata(token).await?;
            let sync = session
                .sync()
                .ok_or_else(|| anyhow!("Sync is not mounted"))?;
            let mut rx = sync.subscribe();
            let mut printed = 0u64;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = rx.borrow_and_update().clone();
                        if !snapshot.is_populated() || snapshot.loading {
                            continue;
                        }
                        println!("{}", render_snapshot(&snapshot, &metadata));
                        printed += 1;
                        if count.is_some_and(|c| printed >= c) {
                            break;
                        }
                    }
                }
            }
            session.unmount();
        }
        StakeCommand::Approve { amount } => {
            let token = session.mount().await?.token();
            let metadata = session.token_metadata(token).await?;
            let amount = parse_amount(&amount, metadata.decimals)?;
            let sync = mounted(&session)?;
            let confirmed = sync.approve(amount).await?;
            print_confirmed("approve", &confirmed);
        }
        StakeCommand::Stake { amount, approve } => {
            let token = session.mount().await?.token();
            let metadata = session.token_metadata(token).await?;
            let amount = parse_amount(&amount, metadata.decimals)?;
            let sync = mounted(&session)?;
            let snapshot = first_snapshot(sync).await?;
            check_min_deposit(&snapshot, amount, &metadata)?;
            if sync.needs_approval(amount) {
                if !approve {
                    return Err(anyhow!(
                        "Allowance {} is below {}; run approve first or pass --approve",
                        format_amount(snapshot.position.allowance, metadata.decimals),
                        format_amount(amount, metadata.decimals)
                    ));
                }
                let confirmed = sync.approve(amount).await?;
                print_confirmed("approve", &confirmed);
            }
            let confirmed = sync.stake(amount).await?;
            print_confirmed("stake", &confirmed);
        }
        StakeCommand::Unstake { amount } => {
            let token = session.mount().await?.token();
            let metadata = session.token_metadata(token).await?;
            let amount = parse_amount(&amount, metadata.decimals)?;
            let sync = mounted(&session)?;
            let confirmed = sync.unstake(amount).await?;
            print_confirmed("unstake", &confirmed);
        }
        StakeCommand::Claim => {
            let sync = session.mount().await?;
            let confirmed = sync.claim().await?;
            print_confirmed("claim", &confirmed);
        }
        StakeCommand::Withdraw => {
            let token = session.mount().await?.token();
            let metadata = session.token_metadata(token).await?;
            let sync = mounted(&session)?;
            let snapshot = first_snapshot(sync).await?;
            if !snapshot.withdrawal.is_withdrawable() {
                return Err(anyhow!(
                    "Nothing unlocked yet, {} still locked",
                    format_token_amount(snapshot.withdrawal.locked_amount(), &metadata)
                ));
            }
            let confirmed = sync.withdraw().await?;
            print_confirmed("withdraw", &confirmed);
        }
        StakeCommand::Balance { address } => {
            let address = address.as_deref().map(parse_address).transpose()?;
            let balance = session.assets().native_balance(address).await?;
            let native = TokenMetadata::native();
            println!("{}", format_token_amount(balance, &native));
        }
        StakeCommand::Send { to, amount } => {
            let to = parse_address(&to)?;
            let amount = parse_amount(&amount, TokenMetadata::native().decimals)?;
            let confirmed = session.assets().send_native(to, amount).await?;
            print_confirmed("send", &confirmed);
        }
        StakeCommand::Transfer { token, to, amount } => {
            let token = resolve_token(session.config().network, &token)?;
            let to = parse_address(&to)?;
            let assets = session.assets();
            let info = assets.token_info(token).await?;
            let amount = parse_amount(&amount, info.decimals)?;
            let confirmed = assets.transfer_token(token, to, amount).await?;
            print_confirmed("transfer", &confirmed);
        }
        StakeCommand::TokenInfo { token } => {
            let token = resolve_token(session.config().network, &token)?;
            let info = session.assets().token_info(token).await?;
            print!("{}", render_token_info(&info));
        }
        StakeCommand::Wrap { amount, token } => {
            let weth = resolve_token(session.config().network, &token)?;
            let amount = parse_amount(&amount, TokenMetadata::native().decimals)?;
            let confirmed = session.assets().wrap(weth, amount).await?;
            print_confirmed("wrap", &confirmed);
        }
        StakeCommand::Events {
            token,
            follow,
            from_block,
            count,
        } => {
            let token = resolve_token(session.config().network, &token)?;
            let assets = session.assets();
            let metadata = assets.token_info(token).await?.metadata();
            if follow {
                let config = FollowConfig {
                    poll_interval: session.config().poll_interval,
                    ..Default::default()
                };
                let cancel = CancellationToken::new();
                let (handle, mut rx) =
                    assets.follow_transfers(token, from_block, config, cancel.clone());
                let mut printed = 0u64;
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        event = rx.recv() => {
                            let Some(event) = event else {
                                break;
                            };
                            println!("{}", render_transfer(&event, &metadata));
                            printed += 1;
                            if count.is_some_and(|c| printed >= c) {
                                break;
                            }
                        }
                    }
                }
                cancel.cancel();
                handle.await?;
            } else {
                let latest = session.adapter().read_block_height().await?;
                let from_block =
                    from_block.unwrap_or_else(|| latest.saturating_sub(DEFAULT_EVENT_LOOKBACK));
                let events = assets.transfer_events(token, from_block, latest).await?;
                let limit = count.map_or(events.len(), |c| c as usize);
                for event in events.iter().take(limit) {
                    println!("{}", render_transfer(event, &metadata));
                }
            }
        }
    }
    Ok(())
}

fn mounted(session: &StakeSession) -> anyhow::Result<&StakeSync> {
    session.sync().ok_or_else(|| anyhow!("Sync is not mounted"))
}

fn check_min_deposit(
    snapshot: &SyncSnapshot,
    amount: ethers::types::U256,
    metadata: &TokenMetadata,
) -> anyhow::Result<()> {
    if let Some(pool) = &snapshot.pool {
        if amount < pool.min_deposit {
            return Err(anyhow!(
                "Amount is below the pool minimum of {} {}",
                format_amount(pool.min_deposit, metadata.decimals),
                metadata.symbol
            ));
        }
    }
    Ok(())
}
