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

//! # Relayer Utils Module
//!
//! Shared error type, probe targets and retry policies for the tBTC
//! cross-chain deposit relayer.

use std::time::{SystemTime, UNIX_EPOCH};

use ethers::core::k256::ecdsa::SigningKey;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::Wallet;

/// A module used for debugging relayer lifecycle, sync state, or other
/// relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;

/// The L1 signing client used across the relayer.
pub type EthersSignerClient =
    SignerMiddleware<Provider<Http>, Wallet<SigningKey>>;

/// An enum of all possible errors that could be encountered during the
/// execution of the relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying Http server.
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Smart contract error against a read-only provider.
    #[error(transparent)]
    EthersContractCall(#[from] ethers::contract::ContractError<Provider<Http>>),
    /// Smart contract error against the signing client.
    #[error(transparent)]
    EthersContractCallWithSigner(
        #[from] ethers::contract::ContractError<EthersSignerClient>,
    ),
    /// Elliptic Curve error.
    #[error(transparent)]
    EllipticCurve(#[from] ethers::core::k256::elliptic_curve::Error),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWalletError(#[from] ethers::signers::WalletError),
    /// A funding transaction hash that is not exactly 64 hex characters.
    #[error("Invalid funding transaction hash, expected 64 hex characters")]
    InvalidFundingHash,
    /// A deposit record carrying fields the chain bindings cannot encode.
    #[error("Malformed deposit record: {}", _0)]
    MalformedDeposit(String),
    /// Chain not found in the configuration.
    #[error("Chain not found: {}", chain_name)]
    ChainNotFound {
        /// The name of the chain.
        chain_name: String,
    },
    /// A configured chain section missing a required field.
    #[error("Chain {} is missing required field: {}", chain_name, field)]
    MissingChainField {
        /// The name of the chain.
        chain_name: String,
        /// The kebab-case name of the missing field.
        field: &'static str,
    },
    /// Unknown destination chain kind in the configuration. Fatal at
    /// startup.
    #[error("Unknown chain type {} for chain: {}", chain_type, chain_name)]
    UnknownChainType {
        /// The unrecognized chain kind.
        chain_type: String,
        /// The name of the chain section carrying it.
        chain_name: String,
    },
    /// Missing required private-key in the config.
    #[error("Missing required private-key in the config")]
    MissingSecrets,
    /// A deposit id that the store has no record for.
    #[error("Deposit not found: {}", _0)]
    DepositNotFound(String),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

/// A type alias for the result of the relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Milliseconds since the unix epoch. Deposit record timestamps use this.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Seconds since the unix epoch, the resolution of EVM block timestamps.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
