//! chainsync CLI: run a multi-chain sync and print the ordered event stream.
//!
//! Usage:
//! ```bash
//! chainsync run   --config chainsync.json
//! chainsync check --config chainsync.json
//! chainsync info
//! ```
//!
//! `run` writes one JSON object per line to stdout; logs go to stderr.

mod logging;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;

use chainsync_core::checkpoint::Checkpoint;
use chainsync_core::config::{default_finality_block_count, SyncConfig};
use chainsync_core::metrics::NoopMetrics;
use chainsync_evm::{NetworkBuilder, SyncEvent, SyncService};
use chainsync_storage::MemorySyncStore;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => match config_path(&args[2..]) {
            Ok(path) => cmd_run(&path).await,
            Err(e) => Err(e),
        },
        "check" => config_path(&args[2..]).and_then(|path| cmd_check(&path)),
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainsync {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe multi-chain EVM event sync\n");
    println!("USAGE:");
    println!("    chainsync <COMMAND> [--config <PATH>]\n");
    println!("COMMANDS:");
    println!("    run      Sync the configured networks and print events as JSON lines");
    println!("    check    Validate a config file");
    println!("    info     Show defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn config_path(args: &[String]) -> Result<String> {
    match args {
        [flag, path] if flag == "--config" || flag == "-c" => Ok(path.clone()),
        [] => bail!("missing --config <PATH>"),
        _ => bail!("unexpected arguments: {}", args.join(" ")),
    }
}

fn load_config(path: &str) -> Result<SyncConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config = SyncConfig::from_json_str(&raw).with_context(|| format!("parsing {path}"))?;
    Ok(config)
}

fn cmd_check(path: &str) -> Result<()> {
    let config = load_config(path)?;
    println!("{path}: ok");
    for network in &config.networks {
        let sources = config.sources_for(&network.name);
        println!(
            "  {} (chain {}): {} source(s), finality {} blocks",
            network.name,
            network.chain_id,
            sources.len(),
            network.finality_block_count()
        );
        for source in sources {
            let end = source
                .end_block
                .map_or_else(|| "head".to_string(), |e| e.to_string());
            println!("    - {} [{}, {end}]", source.id, source.start_block);
        }
    }
    Ok(())
}

async fn cmd_run(path: &str) -> Result<()> {
    let config = load_config(path)?;
    logging::init_tracing(&config.log);

    let networks = config
        .networks
        .iter()
        .map(|network| {
            NetworkBuilder::from_config(network.clone())
                .sources(config.sources_for(&network.name))
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let store = Arc::new(MemorySyncStore::new());
    let (service, mut events) = SyncService::start(networks, store, Arc::new(NoopMetrics))
        .await
        .context("starting sync")?;
    tracing::info!(networks = config.networks.len(), sources = config.sources.len(), "Sync started");

    let mut fatal = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(SyncEvent::Fatal { chain_id, message }) => {
                    fatal = Some(format!("chain {chain_id}: {message}"));
                    break;
                }
                Some(event) => print_event(&event)?,
                None => break,
            },
        }
    }

    service.shutdown().await;
    if let Some(message) = fatal {
        bail!("sync failed on {message}");
    }
    Ok(())
}

fn block_time(checkpoint: &Checkpoint) -> Option<String> {
    let seconds = i64::try_from(checkpoint.block_timestamp).ok()?;
    DateTime::<Utc>::from_timestamp(seconds, 0).map(|t| t.to_rfc3339())
}

fn print_event(event: &SyncEvent) -> Result<()> {
    let line = match event {
        SyncEvent::Events { events, checkpoint } => json!({
            "type": "events",
            "checkpoint": checkpoint.encode()?,
            "chainId": checkpoint.chain_id,
            "blockNumber": checkpoint.block_number,
            "blockTime": block_time(checkpoint),
            "events": events,
        }),
        SyncEvent::Reorg { safe_checkpoint } => json!({
            "type": "reorg",
            "checkpoint": safe_checkpoint.encode()?,
            "chainId": safe_checkpoint.chain_id,
            "blockNumber": safe_checkpoint.block_number,
        }),
        SyncEvent::Finalize { checkpoint } => json!({
            "type": "finalize",
            "checkpoint": checkpoint.encode()?,
            "blockTime": block_time(checkpoint),
        }),
        SyncEvent::Fatal { chain_id, message } => json!({
            "type": "fatal",
            "chainId": chain_id,
            "message": message,
        }),
    };
    println!("{line}");
    Ok(())
}

fn cmd_info() {
    println!("ChainSync v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default polling interval: 1000 ms");
    println!("  Default rate limit: 50 requests/s per network");
    println!("  Default eth_getLogs range: 10000 blocks, trace_filter range: 10 blocks");
    println!(
        "  Default finality: {} blocks (ethereum), {} (polygon), {} (arbitrum), {} (other)",
        default_finality_block_count(1),
        default_finality_block_count(137),
        default_finality_block_count(42_161),
        default_finality_block_count(0),
    );
    println!("  Storage backends: memory");
    println!("  Sources: log, factory log, call trace, factory call trace, block interval");
}
