//! Node configuration: an optional TOML file overridden by CLI flags and
//! `MONIKER_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use moniker_protocol::config::{
    Network, BOOTSTRAP_PEER_TIMEOUT, DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DHT_TIMEOUT,
    GOSSIP_MESSAGE_TTL, GOSSIP_SEEN_CACHE_SIZE, HOT_CACHE_TTL, INDEX_PUBLISH_INTERVAL,
    NONCE_EXPIRY, NONCE_SWEEP_INTERVAL, STARTUP_SYNC_WINDOW, WARM_CACHE_TTL,
};
use moniker_protocol::network::{BootstrapConfig, GossipConfig, ResolverConfig};

use crate::cli::RunArgs;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Everything `moniker-node run` needs. Durations are stored as plain
/// numbers so the TOML stays readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub node_id: String,
    pub network: Network,
    pub data_dir: PathBuf,
    pub listen_address: String,
    pub api_port: u16,
    pub metrics_port: u16,
    /// Base URLs of peer bootstrap nodes.
    pub peers: Vec<String>,
    pub require_nonce: bool,
    pub nonce_expiry_secs: u64,
    pub sweep_interval_secs: u64,
    pub publish_interval_secs: u64,
    pub sync_window_secs: u64,
    pub hot_cache_ttl_secs: u64,
    pub warm_cache_ttl_secs: u64,
    pub dht_timeout_ms: u64,
    pub peer_timeout_ms: u64,
    pub gossip_ttl: u8,
    pub gossip_seen_cache_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "moniker-node".to_string(),
            network: Network::default(),
            data_dir: PathBuf::from("moniker-data"),
            listen_address: "0.0.0.0".to_string(),
            api_port: DEFAULT_API_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            peers: Vec::new(),
            require_nonce: false,
            nonce_expiry_secs: NONCE_EXPIRY.as_secs(),
            sweep_interval_secs: NONCE_SWEEP_INTERVAL.as_secs(),
            publish_interval_secs: INDEX_PUBLISH_INTERVAL.as_secs(),
            sync_window_secs: STARTUP_SYNC_WINDOW.as_secs(),
            hot_cache_ttl_secs: HOT_CACHE_TTL.as_secs(),
            warm_cache_ttl_secs: WARM_CACHE_TTL.as_secs(),
            dht_timeout_ms: DHT_TIMEOUT.as_millis() as u64,
            peer_timeout_ms: BOOTSTRAP_PEER_TIMEOUT.as_millis() as u64,
            gossip_ttl: GOSSIP_MESSAGE_TTL,
            gossip_seen_cache_size: GOSSIP_SEEN_CACHE_SIZE,
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node configuration")
    }

    /// Load the config named by `--config`, else `config.toml` in the data
    /// directory if it exists, else the defaults.
    pub fn load(args: &RunArgs) -> Result<Self> {
        let explicit = args.config.as_deref();
        let fallback = args
            .data_dir
            .clone()
            .unwrap_or_else(|| NodeConfig::default().data_dir)
            .join(CONFIG_FILE_NAME);

        let mut config = match explicit {
            Some(path) => Self::read(path)?,
            None if fallback.exists() => Self::read(&fallback)?,
            None => Self::default(),
        };
        config.apply(args)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Overlay command-line and environment values.
    pub fn apply(&mut self, args: &RunArgs) -> Result<()> {
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(port) = args.api_port {
            self.api_port = port;
        }
        if let Some(port) = args.metrics_port {
            self.metrics_port = port;
        }
        if let Some(network) = &args.network {
            self.network = network.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(id) = &args.node_id {
            self.node_id = id.clone();
        }
        if !args.peers.is_empty() {
            self.peers = args.peers.clone();
        }
        if args.require_nonce {
            self.require_nonce = true;
        }
        Ok(())
    }

    pub fn api_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.api_port)
    }

    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.metrics_port)
    }

    pub fn to_bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            node_id: self.node_id.clone(),
            network: self.network,
            require_nonce: self.require_nonce,
            nonce_expiry: Duration::from_secs(self.nonce_expiry_secs),
            publish_interval: Duration::from_secs(self.publish_interval_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            sync_window: Duration::from_secs(self.sync_window_secs),
            resolver: ResolverConfig {
                hot_ttl: Duration::from_secs(self.hot_cache_ttl_secs),
                warm_ttl: Duration::from_secs(self.warm_cache_ttl_secs),
                dht_timeout: Duration::from_millis(self.dht_timeout_ms),
                peer_timeout: Duration::from_millis(self.peer_timeout_ms),
                origin: self.node_id.clone(),
            },
            gossip: GossipConfig {
                message_ttl: self.gossip_ttl,
                seen_cache_size: self.gossip_seen_cache_size,
            },
        }
    }
}
