//! hpfsd: HotPotato filesystem daemon
//!
//! Usage:
//!   hpfsd [--config /etc/hpfs/config.toml] [--backing-dir DIR] [--mountpoint DIR]
//!         [--self-addr URL] [--peer URL]... [--cache-mb N]
//!
//! Mounts a read-only mirror of the backing directory and shares file
//! contents with the other peers through a distributed in-memory cache.
//! Send SIGHUP to re-read the peer list from the config file.

mod daemon;
mod grpc;
mod metrics;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use hpfs_core::config::{DaemonConfig, HpfsConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "hpfsd", version, about = "HotPotato filesystem daemon")]
struct Cli {
    /// Path to hpfs.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "HPFS_CONFIG",
        default_value = "/etc/hpfs/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error) [default: daemon.log_level]
    #[arg(long, env = "HPFS_LOG")]
    log: Option<String>,

    /// Log format (json, text) [default: daemon.log_format]
    #[arg(long, env = "HPFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Clone, Debug, PartialEq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

/// Flags win over `[daemon]`; anything but "json" in the file means text.
fn log_settings(
    level: Option<String>,
    format: Option<LogFormat>,
    daemon: &DaemonConfig,
) -> (String, LogFormat) {
    let level = level.unwrap_or_else(|| daemon.log_level.clone());
    let format = format.unwrap_or_else(|| {
        if daemon.log_format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    (level, format)
}

/// Command-line settings that take precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Directory to mount the mirror on
    #[arg(long, env = "HPFS_MOUNTPOINT")]
    mountpoint: Option<PathBuf>,

    /// Directory to mirror
    #[arg(long, env = "HPFS_BACKING_DIR")]
    backing_dir: Option<PathBuf>,

    /// In-memory cache budget in MB
    #[arg(long, env = "HPFS_CACHE_MB")]
    cache_mb: Option<u64>,

    /// This node's peer address (e.g. http://10.0.0.1:7450)
    #[arg(long, env = "HPFS_SELF_ADDR")]
    self_addr: Option<String>,

    /// Peer address; repeat for each peer, this node included
    #[arg(long = "peer", value_name = "URL")]
    peers: Vec<String>,
}

impl Overrides {
    fn apply(&self, config: &mut HpfsConfig) {
        if let Some(dir) = &self.mountpoint {
            config.fuse.mountpoint = dir.clone();
        }
        if let Some(dir) = &self.backing_dir {
            config.fuse.backing_dir = dir.clone();
        }
        if let Some(mb) = self.cache_mb {
            config.cache.max_mb = mb;
        }
        if let Some(addr) = &self.self_addr {
            config.peers.self_addr = addr.clone();
        }
        if !self.peers.is_empty() {
            config.peers.peers = self.peers.clone();
        }
    }
}

/// Where the configuration comes from, so it can be re-read on SIGHUP.
pub struct ConfigSource {
    path: PathBuf,
    overrides: Overrides,
}

impl ConfigSource {
    pub fn load(&self) -> Result<HpfsConfig> {
        let mut config = self.read_file()?;
        self.overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Re-read for SIGHUP. The peer list always comes from the file so
    /// edits to it take effect even when `--peer` was given at startup.
    pub fn reload(&self) -> Result<HpfsConfig> {
        let mut config = self.read_file()?;
        let file_peers = std::mem::take(&mut config.peers.peers);
        self.overrides.apply(&mut config);
        if !self.overrides.peers.is_empty() {
            warn!(
                peers = file_peers.len(),
                "reload: --peer list replaced by the config file's peers"
            );
        }
        config.peers.peers = file_peers;
        config.validate()?;
        Ok(config)
    }

    fn read_file(&self) -> Result<HpfsConfig> {
        HpfsConfig::load(&self.path)
            .with_context(|| format!("loading config {}", self.path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let source = ConfigSource {
        path: cli.config,
        overrides: cli.overrides,
    };
    let config = source.load()?;

    // Initialize logging
    let (level, format) = log_settings(cli.log, cli.log_format, &config.daemon);
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %source.path.display(),
        "hpfsd starting"
    );

    daemon::run(source, config).await
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
