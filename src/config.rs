// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Node configuration: defaults, overlaid by an optional TOML file, then
//! environment variables, then CLI flags.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

fn default_dedup_window() -> Duration {
    crate::routing::dedup::DEFAULT_DEDUP_WINDOW
}

fn default_sweep_interval() -> Duration {
    crate::routing::dedup::DEFAULT_SWEEP_INTERVAL
}

fn default_address_book_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_decompression_cap() -> u32 {
    crate::codec::wire::DEFAULT_DECOMPRESSION_CAP
}

/// TOML-deserializable overlay; every field optional so a partial file only
/// overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    moniker: Option<String>,
    data_dir: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    listen_addr: Option<String>,
    bootstrap_peers: Option<Vec<String>>,
    encryption_enabled: Option<bool>,
    session_encryption_enabled: Option<bool>,
    gossip_ttl: Option<u8>,
    outbound_channel_capacity_floor: Option<usize>,
    json_logs: Option<bool>,
    log_dir: Option<PathBuf>,
}

/// CLI flags; only the overrides an operator plausibly types by hand.
#[derive(Debug, StructOpt)]
#[structopt(name = "dknet-node")]
struct Cli {
    /// Path to a TOML config file (default: `<data_dir>/dknet.toml`).
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Display moniker for this node's address-book entry.
    #[structopt(long)]
    moniker: Option<String>,

    /// Directory holding node identity, address book, and key/operation stores.
    #[structopt(long, parse(from_os_str))]
    data_dir: Option<PathBuf>,

    /// Multiaddr (or equivalent) the network-layer collaborator should listen on.
    #[structopt(long)]
    listen: Option<String>,

    /// Directory to write rolling log files to, instead of stdout.
    #[structopt(long, parse(from_os_str))]
    log_dir: Option<PathBuf>,

    /// Emit structured JSON logs instead of compact text.
    #[structopt(long)]
    json_logs: bool,

    /// Increase log verbosity (repeatable).
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub moniker: String,
    pub data_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub listen_addr: Option<String>,
    pub bootstrap_peers: Vec<String>,
    pub encryption_enabled: bool,
    pub session_encryption_enabled: bool,
    pub gossip_ttl: u8,
    pub dedup_window: Duration,
    pub dedup_sweep_interval: Duration,
    pub address_book_gossip_interval: Duration,
    pub decompression_cap_bytes: u32,
    pub keygen_timeout: Duration,
    pub signing_timeout: Duration,
    pub resharing_timeout: Duration,
    pub outbound_channel_capacity_floor: usize,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_next::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dknet");
        Self {
            moniker: "dknet-node".to_string(),
            storage_dir: data_dir.join("storage"),
            data_dir,
            listen_addr: None,
            bootstrap_peers: Vec::new(),
            encryption_enabled: true,
            session_encryption_enabled: false,
            gossip_ttl: crate::codec::RoutedMessage::DEFAULT_TTL,
            dedup_window: default_dedup_window(),
            dedup_sweep_interval: default_sweep_interval(),
            address_book_gossip_interval: default_address_book_interval(),
            decompression_cap_bytes: default_decompression_cap(),
            keygen_timeout: crate::engine::KEYGEN_TIMEOUT,
            signing_timeout: crate::engine::SIGNING_TIMEOUT,
            resharing_timeout: crate::engine::RESHARING_TIMEOUT,
            outbound_channel_capacity_floor: 2,
            json_logs: false,
            log_dir: None,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional TOML file, environment
    /// variables, then CLI flags, in that overriding order.
    pub fn from_sources() -> Result<Self> {
        let cli = Cli::from_args();
        let mut config = Config::default();

        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| config.data_dir.join("dknet.toml"));
        if let Ok(contents) = std::fs::read_to_string(&config_path) {
            let file: FileConfig = toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid config file {}: {}", config_path.display(), e)))?;
            config.apply_file(file);
        }

        config.apply_env();
        config.apply_cli(cli);
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.moniker {
            self.moniker = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.storage_dir {
            self.storage_dir = v;
        }
        if let Some(v) = file.listen_addr {
            self.listen_addr = Some(v);
        }
        if let Some(v) = file.bootstrap_peers {
            self.bootstrap_peers = v;
        }
        if let Some(v) = file.encryption_enabled {
            self.encryption_enabled = v;
        }
        if let Some(v) = file.session_encryption_enabled {
            self.session_encryption_enabled = v;
        }
        if let Some(v) = file.gossip_ttl {
            self.gossip_ttl = v;
        }
        if let Some(v) = file.outbound_channel_capacity_floor {
            self.outbound_channel_capacity_floor = v;
        }
        if let Some(v) = file.json_logs {
            self.json_logs = v;
        }
        if let Some(v) = file.log_dir {
            self.log_dir = Some(v);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DKNET_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DKNET_MONIKER") {
            self.moniker = v;
        }
        // TSS_ENCRYPTION_PASSWORD is read directly by storage-key derivation at
        // startup rather than stored on Config; see `node::Node::bootstrap`.
    }

    fn apply_cli(&mut self, cli: Cli) {
        if let Some(v) = cli.moniker {
            self.moniker = v;
        }
        if let Some(v) = cli.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = cli.listen {
            self.listen_addr = Some(v);
        }
        if let Some(v) = cli.log_dir {
            self.log_dir = Some(v);
        }
        if cli.json_logs {
            self.json_logs = true;
        }
        if cli.verbose > 0 {
            self.verbosity = cli.verbose;
        }
    }

    pub fn p2p_key_path(&self) -> PathBuf {
        self.data_dir.join("p2p_key")
    }

    pub fn address_book_path(&self) -> PathBuf {
        self.data_dir.join("node_addresses.json")
    }

    pub fn storage_password_env_var() -> &'static str {
        "TSS_ENCRYPTION_PASSWORD"
    }
}

/// Resolves the storage encryption password: required whenever
/// `encryption_enabled` is set, absent otherwise.
pub fn storage_password(config: &Config) -> Result<String> {
    match std::env::var(Config::storage_password_env_var()) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ if config.encryption_enabled => Err(Error::Config(format!(
            "{} must be set when encryption is enabled",
            Config::storage_password_env_var()
        ))),
        _ => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(config.encryption_enabled);
        assert_eq!(config.outbound_channel_capacity_floor, 2);
        assert_eq!(config.storage_dir, config.data_dir.join("storage"));
    }
}
