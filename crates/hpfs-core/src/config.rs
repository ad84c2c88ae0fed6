use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HpfsError, HpfsResult};

/// Top-level daemon configuration (loaded from hpfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HpfsConfig {
    pub daemon: DaemonConfig,
    pub fuse: FuseConfig,
    pub cache: CacheConfig,
    pub peers: PeerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9110)
    pub metrics_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseConfig {
    /// Where the mirror is mounted
    pub mountpoint: PathBuf,
    /// The real directory being mirrored
    pub backing_dir: PathBuf,
    /// Pass allow_other to fusermount3
    pub allow_other: bool,
    /// Kernel attribute/entry cache TTL in seconds (default: 1)
    pub attr_ttl_secs: u64,
    /// Filesystem name shown in mount tables
    pub fs_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// In-memory content cache budget per node in MB (default: 64)
    pub max_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// This node's address as the other peers know it
    pub self_addr: String,
    /// Bind address for the peer gRPC server
    pub listen: String,
    /// Every peer in the cluster, this node included
    pub peers: Vec<String>,
    /// Timeout for a forwarded get, connect included
    pub timeout_ms: u64,
    /// Virtual points per peer on the hash ring
    pub replicas: usize,
    /// Largest file that can travel between peers, in MB
    pub max_message_mb: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            metrics_addr: Some("127.0.0.1:9110".into()),
        }
    }
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::from("/mnt/hpfs"),
            backing_dir: PathBuf::from("/srv/hpfs"),
            allow_other: false,
            attr_ttl_secs: 1,
            fs_name: "hpfs".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_mb: 64 }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            self_addr: "http://127.0.0.1:7450".into(),
            listen: "0.0.0.0:7450".into(),
            peers: Vec::new(),
            timeout_ms: 2000,
            replicas: 50,
            max_message_mb: 256,
        }
    }
}

impl CacheConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_mb.saturating_mul(1 << 20)
    }
}

impl PeerConfig {
    pub fn max_message_bytes(&self) -> usize {
        usize::try_from(self.max_message_mb.saturating_mul(1 << 20)).unwrap_or(usize::MAX)
    }
}

impl HpfsConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> HpfsResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| HpfsError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Reject settings the daemon cannot start with.
    pub fn validate(&self) -> HpfsResult<()> {
        if self.fuse.backing_dir.as_os_str().is_empty() {
            return Err(HpfsError::Config("fuse.backing_dir is empty".into()));
        }
        if self.fuse.mountpoint.as_os_str().is_empty() {
            return Err(HpfsError::Config("fuse.mountpoint is empty".into()));
        }
        if self.peers.replicas == 0 {
            return Err(HpfsError::Config("peers.replicas must be at least 1".into()));
        }
        if self.peers.timeout_ms == 0 {
            return Err(HpfsError::Config("peers.timeout_ms must be non-zero".into()));
        }
        if self.peers.self_addr.is_empty() {
            return Err(HpfsError::Config("peers.self_addr is empty".into()));
        }
        Ok(())
    }
}
