//! Configuration for overflow-gate.

use crate::error::{Error, Result};
use crate::ledger::RetryPolicy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Sui network the treasury contract is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiNetwork {
    /// Public testnet.
    #[default]
    Testnet,
    /// Mainnet.
    Mainnet,
    /// Devnet.
    Devnet,
    /// Local validator.
    Localnet,
}

impl SuiNetwork {
    /// Public full-node URL for this network.
    ///
    /// Only used for display; the RPC endpoint itself is always configured.
    #[must_use]
    pub fn public_fullnode_url(self) -> &'static str {
        match self {
            Self::Testnet => "https://fullnode.testnet.sui.io:443",
            Self::Mainnet => "https://fullnode.mainnet.sui.io:443",
            Self::Devnet => "https://fullnode.devnet.sui.io:443",
            Self::Localnet => "http://127.0.0.1:9000",
        }
    }
}

impl fmt::Display for SuiNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
            Self::Devnet => "devnet",
            Self::Localnet => "localnet",
        };
        f.write_str(name)
    }
}

impl FromStr for SuiNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            "devnet" => Ok(Self::Devnet),
            "localnet" => Ok(Self::Localnet),
            other => Err(Error::Config(format!("unknown Sui network: {other}"))),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Directory holding the persisted balance snapshot.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Ledger connection and treasury identifiers.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Balance listener configuration.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Pricing for the gated resources.
    #[serde(default)]
    pub resources: ResourcesConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Ledger connection configuration.
///
/// The identifiers are optional here so a partially filled file can be
/// completed from the environment; [`LedgerConfig::validate`] turns this into
/// a [`LedgerTarget`] or reports everything that is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Network selector.
    #[serde(default)]
    pub network: SuiNetwork,

    /// JSON-RPC endpoint of a Sui full node.
    #[serde(default)]
    pub rpc_endpoint: Option<String>,

    /// Package id of the treasury Move package.
    #[serde(default)]
    pub treasury_package_id: Option<String>,

    /// Object id of the shared treasury object (payment destination).
    #[serde(default)]
    pub treasury_object_id: Option<String>,

    /// Full coin type of the stablecoin, e.g. `0x…::usdc::USDC`.
    #[serde(default)]
    pub usdc_type: Option<String>,

    /// Decimal places of the stablecoin.
    #[serde(default = "default_usdc_decimals")]
    pub usdc_decimals: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts made before a missing transaction counts as not yet indexed.
    #[serde(default = "default_indexing_retries")]
    pub indexing_retries: u32,

    /// Base backoff between retries in milliseconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

/// Fully validated ledger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTarget {
    /// Network selector.
    pub network: SuiNetwork,
    /// JSON-RPC endpoint.
    pub rpc_endpoint: String,
    /// Treasury package id.
    pub treasury_package_id: String,
    /// Treasury object id.
    pub treasury_object_id: String,
    /// Stablecoin coin type.
    pub usdc_type: String,
    /// Stablecoin decimals.
    pub usdc_decimals: u32,
}

/// Balance listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Start the listener when the node boots.
    #[serde(default)]
    pub autostart: bool,

    /// Move module emitting deposit/withdrawal events.
    #[serde(default = "default_event_module")]
    pub event_module: String,

    /// Delay between polls once the event stream is drained, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Events requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Backoff cap after consecutive failures, in milliseconds.
    #[serde(default = "default_listener_max_backoff")]
    pub max_backoff_ms: u64,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

/// Pricing of the gated resources, in stablecoin units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Price of one AI insight.
    #[serde(default = "default_insight_price")]
    pub insight_price: Decimal,

    /// Blitz round entry fee.
    #[serde(default = "default_blitz_price")]
    pub blitz_price: Decimal,

    /// Blitz access window in seconds.
    #[serde(default = "default_blitz_window")]
    pub blitz_window_secs: u64,

    /// Bet multiplier granted during a Blitz round.
    #[serde(default = "default_blitz_multiplier")]
    pub blitz_multiplier: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            ledger: LedgerConfig::default(),
            listener: ListenerConfig::default(),
            server: ServerConfig::default(),
            resources: ResourcesConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            network: SuiNetwork::default(),
            rpc_endpoint: None,
            treasury_package_id: None,
            treasury_object_id: None,
            usdc_type: None,
            usdc_decimals: default_usdc_decimals(),
            request_timeout_secs: default_request_timeout(),
            indexing_retries: default_indexing_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            event_module: default_event_module(),
            poll_interval_ms: default_poll_interval(),
            page_size: default_page_size(),
            max_backoff_ms: default_listener_max_backoff(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            insight_price: default_insight_price(),
            blitz_price: default_blitz_price(),
            blitz_window_secs: default_blitz_window(),
            blitz_multiplier: default_blitz_multiplier(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "overflow-gate")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".overflow-gate"))
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_usdc_decimals() -> u32 {
    6
}

const fn default_request_timeout() -> u64 {
    10
}

const fn default_indexing_retries() -> u32 {
    4
}

const fn default_retry_base_delay() -> u64 {
    500
}

const fn default_retry_max_delay() -> u64 {
    4_000
}

fn default_event_module() -> String {
    "treasury".to_string()
}

const fn default_poll_interval() -> u64 {
    2_000
}

const fn default_page_size() -> usize {
    50
}

const fn default_listener_max_backoff() -> u64 {
    60_000
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8402))
}

fn default_insight_price() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_blitz_price() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

const fn default_blitz_window() -> u64 {
    60
}

const fn default_blitz_multiplier() -> u32 {
    2
}

impl LedgerConfig {
    /// Check that every required value is present.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming every missing variable at once.
    pub fn validate(&self) -> Result<LedgerTarget> {
        fn present(value: Option<&String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        let rpc_endpoint = present(self.rpc_endpoint.as_ref());
        let treasury_package_id = present(self.treasury_package_id.as_ref());
        let treasury_object_id = present(self.treasury_object_id.as_ref());
        let usdc_type = present(self.usdc_type.as_ref());

        let mut missing = Vec::new();
        if rpc_endpoint.is_none() {
            missing.push("SUI_RPC_ENDPOINT");
        }
        if treasury_package_id.is_none() {
            missing.push("TREASURY_PACKAGE_ID");
        }
        if treasury_object_id.is_none() {
            missing.push("TREASURY_OBJECT_ID");
        }
        if usdc_type.is_none() {
            missing.push("USDC_TYPE");
        }

        match (rpc_endpoint, treasury_package_id, treasury_object_id, usdc_type) {
            (
                Some(rpc_endpoint),
                Some(treasury_package_id),
                Some(treasury_object_id),
                Some(usdc_type),
            ) => Ok(LedgerTarget {
                network: self.network,
                rpc_endpoint,
                treasury_package_id,
                treasury_object_id,
                usdc_type,
                usdc_decimals: self.usdc_decimals,
            }),
            _ => Err(Error::Config(format!(
                "missing required ledger settings: {}",
                missing.join(", ")
            ))),
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry schedule for ledger lookups.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.indexing_retries.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl ListenerConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Backoff cap as a duration.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl GateConfig {
    /// Path of the persisted balance snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.root_dir.join("balances.msgpack")
    }

    /// Path of the persisted consumed-reference record.
    #[must_use]
    pub fn consumed_path(&self) -> PathBuf {
        self.root_dir.join("consumed.msgpack")
    }

    /// Path of the persisted unexpired timed grants.
    #[must_use]
    pub fn grants_path(&self) -> PathBuf {
        self.root_dir.join("grants.msgpack")
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
