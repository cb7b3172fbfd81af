//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use overflow_gate::config::{GateConfig, SuiNetwork};
use std::net::SocketAddr;
use std::path::PathBuf;

/// x402 payment gate and treasury balance reconciler for the Overflow game.
#[derive(Parser, Debug)]
#[command(name = "overflow-gate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding balance and consumed-payment snapshots.
    #[arg(long, env = "OVERFLOW_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long, env = "OVERFLOW_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Sui network.
    #[arg(long, value_enum, env = "SUI_NETWORK")]
    pub network: Option<CliNetwork>,

    /// Sui full-node JSON-RPC endpoint.
    #[arg(long, env = "SUI_RPC_ENDPOINT")]
    pub rpc_endpoint: Option<String>,

    /// Treasury Move package id.
    #[arg(long, env = "TREASURY_PACKAGE_ID")]
    pub treasury_package_id: Option<String>,

    /// Treasury shared object id (payment destination).
    #[arg(long, env = "TREASURY_OBJECT_ID")]
    pub treasury_object_id: Option<String>,

    /// Full stablecoin coin type.
    #[arg(long, env = "USDC_TYPE")]
    pub usdc_type: Option<String>,

    /// Start the balance listener at boot.
    #[arg(long)]
    pub autostart_listener: bool,

    /// Log level (defaults to the config file's, then "info").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub log_json: bool,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Sui network CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliNetwork {
    /// Public testnet.
    Testnet,
    /// Mainnet.
    Mainnet,
    /// Devnet.
    Devnet,
    /// Local validator.
    Localnet,
}

impl Cli {
    /// Convert CLI arguments into a `GateConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<GateConfig> {
        let mut config = if let Some(ref path) = self.config {
            GateConfig::from_file(path)?
        } else {
            GateConfig::default()
        };

        if let Some(root_dir) = self.root_dir {
            config.root_dir = root_dir;
        }
        if let Some(listen) = self.listen {
            config.server.listen_addr = listen;
        }
        if let Some(network) = self.network {
            config.ledger.network = network.into();
        }

        let ledger = &mut config.ledger;
        ledger.rpc_endpoint = self.rpc_endpoint.or(ledger.rpc_endpoint.take());
        ledger.treasury_package_id = self
            .treasury_package_id
            .or(ledger.treasury_package_id.take());
        ledger.treasury_object_id = self
            .treasury_object_id
            .or(ledger.treasury_object_id.take());
        ledger.usdc_type = self.usdc_type.or(ledger.usdc_type.take());

        config.listener.autostart |= self.autostart_listener;
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        Ok(config)
    }
}

impl From<CliNetwork> for SuiNetwork {
    fn from(n: CliNetwork) -> Self {
        match n {
            CliNetwork::Testnet => SuiNetwork::Testnet,
            CliNetwork::Mainnet => SuiNetwork::Mainnet,
            CliNetwork::Devnet => SuiNetwork::Devnet,
            CliNetwork::Localnet => SuiNetwork::Localnet,
        }
    }
}
