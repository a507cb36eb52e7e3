// Copyright 2024 Threshold Network Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]

//! # Relayer Configuration Module
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! The relayer configuration module is responsible for configuring the
//! relayer. Configuration is read from TOML/JSON files in a config
//! directory, merged with the process environment. Possible
//! configuration include:
//! * `port`: The port the HTTP surface will listen on.
//! * `data-dir`: Directory of the JSON deposit store (`JSON_PATH`).
//! * `chains`: destination chains and their L1/L2 endpoints.

/// CLI configuration
pub mod cli;
/// Utils for processing configuration
pub mod utils;

use std::collections::HashMap;
use std::path::PathBuf;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tbtc_relayer_types::{PrivateKey, RpcUrl};

/// The default port the relayer HTTP surface listens on.
const fn default_port() -> u16 {
    3000
}
/// The default deposit store directory.
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/")
}
/// The backfill binary search starts at block `0` by default.
const fn default_l2_start_block() -> u64 {
    0
}
/// The events poll interval is `12_000` ms by default.
const fn polling_interval_default() -> u64 {
    12_000
}
/// The maximum blocks per events query is `100` by default.
const fn max_blocks_per_step_default() -> u64 {
    100
}
/// Reconcile passes run every `60` seconds by default.
const fn reconcile_interval_default() -> u64 {
    60
}
/// The past-deposits scan runs every `600` seconds by default.
const fn past_scan_interval_default() -> u64 {
    600
}
/// The past-deposits scan covers the last `60` minutes by default.
const fn past_minutes_default() -> u64 {
    60
}

/// RelayerConfig is the root configuration for the relayer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// HTTP server port number.
    #[serde(default = "default_port", skip_serializing)]
    pub port: u16,
    /// Deposit store directory, one JSON file per deposit.
    ///
    /// The `JSON_PATH` environment variable overrides this.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Destination chains and their configuration.
    ///
    /// a map between chain name and its configuration.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
    /// Reconcile loop configuration.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl RelayerConfig {
    /// Makes sure that the config is valid, by going through the whole
    /// config and doing some basic checks.
    pub fn verify(&self) -> tbtc_relayer_utils::Result<()> {
        let enabled = self.chains.values().filter(|c| c.enabled);
        for chain in enabled {
            if chain.private_key.is_none() {
                return Err(tbtc_relayer_utils::Error::MissingSecrets);
            }
            // A chain that subscribes to L2 events directly needs the L2
            // side configured; endpoint-fed chains do not.
            let direct = !chain.use_endpoint;
            if direct && chain.l2_rpc.is_none() {
                return Err(tbtc_relayer_utils::Error::MissingChainField {
                    chain_name: chain.name.clone(),
                    field: "l2-rpc",
                });
            }
            if direct && chain.l2_contract_address.is_none() {
                return Err(tbtc_relayer_utils::Error::MissingChainField {
                    chain_name: chain.name.clone(),
                    field: "l2-contract-address",
                });
            }
        }
        Ok(())
    }
}

/// The supported destination chain kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainType {
    /// An EVM rollup. The reference handler.
    Evm,
    /// Starknet.
    Starknet,
    /// Sui.
    Sui,
    /// Solana.
    Solana,
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainType::Evm => write!(f, "EVM"),
            ChainType::Starknet => write!(f, "STARKNET"),
            ChainType::Sui => write!(f, "SUI"),
            ChainType::Solana => write!(f, "SOLANA"),
        }
    }
}

impl std::str::FromStr for ChainType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "EVM" => Ok(ChainType::Evm),
            "STARKNET" => Ok(ChainType::Starknet),
            "SUI" => Ok(ChainType::Sui),
            "SOLANA" => Ok(ChainType::Solana),
            other => Err(format!("unknown chain type: {other}")),
        }
    }
}

/// ChainConfig is the per-destination-chain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// String that groups configuration for this chain on a
    /// human-readable name.
    pub name: String,
    /// Which handler drives this chain.
    pub chain_type: ChainType,
    /// Boolean indicating this chain is enabled or not.
    #[serde(default)]
    pub enabled: bool,
    /// Http(s) endpoint of the L1 (Ethereum) node.
    ///
    /// Accepts `$L1_RPC` style env indirection.
    #[serde(skip_serializing)]
    pub l1_rpc: RpcUrl,
    /// Http(s) endpoint of the L2 node. Absent for endpoint-fed chains.
    #[serde(skip_serializing, default)]
    pub l2_rpc: Option<RpcUrl>,
    /// The L1 depositor contract address.
    pub l1_contract_address: Address,
    /// The L2 depositor contract address. Absent for endpoint-fed chains.
    #[serde(default)]
    pub l2_contract_address: Option<Address>,
    /// The TBTCVault contract address on L1.
    pub vault_address: Address,
    /// The relayer's signing key on L1.
    ///
    /// Accepts `0x…` hex or `$PRIVATE_KEY` style env indirection.
    #[serde(skip_serializing, default)]
    pub private_key: Option<PrivateKey>,
    /// When true, deposit intents arrive through the off-chain reveal
    /// endpoint instead of a direct L2 subscription; the historical
    /// past-deposits scan is skipped for this chain.
    #[serde(default)]
    pub use_endpoint: bool,
    /// Lower bound of the backfill binary search.
    ///
    /// The `L2_START_BLOCK` environment variable overrides this.
    #[serde(default = "default_l2_start_block")]
    pub l2_start_block: u64,
    /// Controls the event listeners for this chain.
    #[serde(default)]
    pub events_watcher: EventsWatcherConfig,
}

/// EventsWatcherConfig is the configuration of the event listeners.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventsWatcherConfig {
    /// Polling interval in milliseconds.
    #[serde(default = "polling_interval_default")]
    pub polling_interval: u64,
    /// How many blocks to cover per events query.
    #[serde(default = "max_blocks_per_step_default")]
    pub max_blocks_per_step: u64,
}

impl Default for EventsWatcherConfig {
    fn default() -> Self {
        Self {
            polling_interval: polling_interval_default(),
            max_blocks_per_step: max_blocks_per_step_default(),
        }
    }
}

/// ReconcilerConfig is the configuration of the periodic reconcile loops.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReconcilerConfig {
    /// Seconds between QUEUED→INITIALIZED passes.
    #[serde(default = "reconcile_interval_default")]
    pub initialize_interval: u64,
    /// Seconds between INITIALIZED→FINALIZED passes.
    #[serde(default = "reconcile_interval_default")]
    pub finalize_interval: u64,
    /// Seconds between historical past-deposits scans.
    #[serde(default = "past_scan_interval_default")]
    pub past_scan_interval: u64,
    /// How many minutes back each past-deposits scan covers.
    #[serde(default = "past_minutes_default")]
    pub past_minutes: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            initialize_interval: reconcile_interval_default(),
            finalize_interval: reconcile_interval_default(),
            past_scan_interval: past_scan_interval_default(),
            past_minutes: past_minutes_default(),
        }
    }
}
