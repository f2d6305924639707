use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use surfstore_rs::config::{ServerConfig, SyncConfig};
use surfstore_rs::sync;

#[derive(Parser, Debug)]
#[command(name = "surfstore", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one client reconciliation pass against a MetaStore.
    Sync {
        /// MetaStore address, e.g. 127.0.0.1:8080
        #[arg(short = 'm', long = "metastore")]
        metastore: Option<String>,

        /// Base directory to reconcile
        #[arg(short = 'b', long = "base-dir")]
        base_dir: Option<PathBuf>,

        /// Chunk size in bytes used when splitting files into blocks
        #[arg(short = 's', long = "block-size")]
        block_size: Option<usize>,

        /// Repeat the sync pass every `interval` instead of exiting after one
        #[arg(long = "watch")]
        watch: Option<humantime_interval::Interval>,
    },

    /// Run a MetaStore server.
    ServeMeta {
        /// Address to bind
        #[arg(short = 'a', long = "addr")]
        addr: Option<String>,

        /// Block store address; may be repeated to configure the ring
        #[arg(short = 'b', long = "block-store")]
        block_store: Vec<String>,
    },

    /// Run a BlockStore server.
    ServeBlock {
        /// Address to bind
        #[arg(short = 'a', long = "addr")]
        addr: Option<String>,

        /// Directory backing this block store (accepted for parity; blocks
        /// are held in memory for the lifetime of the process)
        #[arg(short = 'd', long = "data-dir")]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = surfstore_rs::logging::init_default_log_file()?;
    surfstore_rs::logging::info(format!("logging to {}", log_path.display()));

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync {
            metastore,
            base_dir,
            block_size,
            watch,
        } => run_sync_command(metastore, base_dir, block_size, watch).await,
        Commands::ServeMeta { addr, block_store } => run_serve_meta(addr, block_store).await,
        Commands::ServeBlock { addr, data_dir } => run_serve_block(addr, data_dir).await,
    }
}

async fn run_sync_command(
    metastore: Option<String>,
    base_dir: Option<PathBuf>,
    block_size: Option<usize>,
    watch: Option<humantime_interval::Interval>,
) -> Result<()> {
    let resolved = SyncConfig::resolve(metastore, base_dir, block_size)?;
    let cfg = sync::SyncConfig {
        metastore_addr: resolved.metastore_addr,
        base_dir: resolved.base_dir,
        block_size: resolved.block_size,
    };

    match watch {
        None => sync::run_sync(&cfg).await,
        Some(interval) => loop {
            if let Err(e) = sync::run_sync(&cfg).await {
                surfstore_rs::logging::error(format!("sync pass failed: {e:#}"));
            } else {
                surfstore_rs::logging::info("sync pass complete");
            }
            tokio::time::sleep(interval.0).await;
        },
    }
}

async fn run_serve_meta(addr: Option<String>, block_store: Vec<String>) -> Result<()> {
    let cfg = ServerConfig::resolve(addr, None, block_store);
    if cfg.block_store_addrs.is_empty() {
        anyhow::bail!("serve-meta requires at least one --block-store address");
    }
    surfstore_rs::metastore::serve(&cfg.addr, cfg.block_store_addrs).await?;
    wait_for_shutdown().await
}

async fn run_serve_block(addr: Option<String>, data_dir: Option<PathBuf>) -> Result<()> {
    let cfg = ServerConfig::resolve(addr, data_dir, Vec::new());
    surfstore_rs::blockstore::serve(&cfg.addr).await?;
    wait_for_shutdown().await
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    surfstore_rs::logging::info("shutting down");
    Ok(())
}

/// A tiny wrapper so `--watch 30s` parses through clap without pulling in
/// a dedicated duration-parsing crate for a single flag.
mod humantime_interval {
    use std::str::FromStr;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    pub struct Interval(pub Duration);

    impl FromStr for Interval {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let s = s.trim();
            let (digits, suffix) = s
                .find(|c: char| !c.is_ascii_digit())
                .map(|i| s.split_at(i))
                .unwrap_or((s, "s"));
            let n: u64 = digits.parse().map_err(|_| format!("invalid interval {s}"))?;
            let secs = match suffix {
                "" | "s" => n,
                "m" => n * 60,
                "h" => n * 3600,
                "ms" => return Ok(Interval(Duration::from_millis(n))),
                other => return Err(format!("unknown interval suffix {other}")),
            };
            Ok(Interval(Duration::from_secs(secs)))
        }
    }
}
