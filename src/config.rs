use crate::block::{CHUNK_SIZE, MAX_FILE_CHUNKS};
use crate::error::{FilechainError, Result};
use crate::peers::PeerAddr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Socket limits shared by servers and clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetConfig {
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    /// Largest frame body accepted from the wire.
    pub max_frame_bytes: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            io_timeout_ms: 10_000,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl NetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Everything a node needs to serve, gossip and join.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Address to bind and to advertise to peers.
    pub listen: PeerAddr,
    /// Concurrent inbound connections served at once.
    pub max_connections: usize,
    pub net: NetConfig,
    /// Attempts per peer per announcement (1 = no retry).
    pub gossip_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Re-gossip budget carried by a new announcement.
    pub max_hops: u8,
    /// How many unknown predecessors a node will fetch to close a gap.
    pub max_backfill: usize,
    /// Consecutive failures before a peer is skipped.
    pub peer_failure_threshold: u32,
    /// Seconds a failing peer is skipped before it is tried again.
    pub peer_cooldown_secs: u64,
    /// Upper bound on `index_all` for an uploaded file.
    pub max_file_chunks: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: PeerAddr::new("127.0.0.1", 0),
            max_connections: 20,
            net: NetConfig::default(),
            gossip_attempts: 1,
            retry_backoff_ms: 200,
            max_hops: 16,
            max_backfill: 1024,
            peer_failure_threshold: 3,
            peer_cooldown_secs: 30,
            max_file_chunks: MAX_FILE_CHUNKS,
        }
    }
}

impl NodeConfig {
    pub fn with_listen(mut self, listen: PeerAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(FilechainError::Config("max_connections must be > 0".into()));
        }
        if self.gossip_attempts == 0 {
            return Err(FilechainError::Config("gossip_attempts must be > 0".into()));
        }
        if self.max_file_chunks == 0 || self.max_file_chunks > MAX_FILE_CHUNKS {
            return Err(FilechainError::Config(format!(
                "max_file_chunks must be in 1..={}",
                MAX_FILE_CHUNKS
            )));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn peer_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.peer_cooldown_secs as i64)
    }
}

/// Settings for the command-line client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub net: NetConfig,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            chunk_size: CHUNK_SIZE,
        }
    }
}
