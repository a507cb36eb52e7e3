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

use config::{Config, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{ChainType, RelayerConfig};

/// A helper function that will search for all config files in the given
/// directory and return them as a vec of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> tbtc_relayer_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config
    // directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(tbtc_relayer_utils::Error::from))
        .collect()
}

/// Try to parse the [`RelayerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> tbtc_relayer_utils::Result<RelayerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of TBTC).
    let builder = builder
        .add_source(config::Environment::with_prefix("TBTC").separator("_"));
    let cfg = builder.build()?;
    // an unknown chain kind is its own startup failure, checked before
    // the full deserialize would fold it into a generic parse error.
    check_chain_types(&cfg)?;
    // and finally deserialize the config and post-process it
    let config: Result<
        RelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files.
///
/// Returns `Ok(RelayerConfig)` on success, or the error of the first
/// file that failed to load or parse.
///
/// it is the same as using the [`search_config_files`] and
/// [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> tbtc_relayer_utils::Result<RelayerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// Rejects configurations naming a chain kind no handler exists for.
fn check_chain_types(cfg: &Config) -> tbtc_relayer_utils::Result<()> {
    let chains: HashMap<String, HashMap<String, config::Value>> =
        cfg.get("chains").unwrap_or_default();
    for (chain_name, table) in chains {
        let Some(value) = table.get("chain-type") else {
            continue;
        };
        let raw = value.to_string();
        if raw.parse::<ChainType>().is_err() {
            return Err(tbtc_relayer_utils::Error::UnknownChainType {
                chain_type: raw,
                chain_name,
            });
        }
    }
    Ok(())
}

/// The postloading_process exists to validate configuration and
/// standardize the format of the configuration.
pub fn postloading_process(
    mut config: RelayerConfig,
) -> tbtc_relayer_utils::Result<RelayerConfig> {
    tracing::trace!("Checking configuration sanity ...");

    // The bare process environment wins over anything the files said.
    if let Ok(path) = std::env::var("JSON_PATH") {
        config.data_dir = PathBuf::from(path);
    }
    let l2_start_block = std::env::var("L2_START_BLOCK")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok());

    // 1. drain everything, and take enabled chains.
    let old_chains = config
        .chains
        .drain()
        .filter(|(_, chain)| chain.enabled)
        .collect::<HashMap<_, _>>();
    // 2. insert them again, keyed by their lowercased chain name.
    for (_, mut chain) in old_chains {
        if let Some(start_block) = l2_start_block {
            chain.l2_start_block = start_block;
        }
        if chain.use_endpoint && chain.l2_rpc.is_some() {
            tracing::warn!(
                chain = %chain.name,
                "l2-rpc is ignored for endpoint-fed chains",
            );
        }
        config.chains.insert(chain.name.to_lowercase(), chain);
    }

    config.verify()?;

    tracing::trace!(
        "postloaded config: {}",
        serde_json::to_string_pretty(&config)?
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use crate::ChainType;

    use super::*;

    const SAMPLE: &str = r#"
        port = 4000
        data-dir = "./relayer-data/"

        [chains.ArbitrumOne]
        name = "ArbitrumOne"
        chain-type = "EVM"
        enabled = true
        l1-rpc = "https://eth.example.com"
        l2-rpc = "https://arb.example.com"
        l1-contract-address = "0x1111111111111111111111111111111111111111"
        l2-contract-address = "0x2222222222222222222222222222222222222222"
        vault-address = "0x3333333333333333333333333333333333333333"
        private-key = "0x4444444444444444444444444444444444444444444444444444444444444444"

        [chains.SuiMainnet]
        name = "SuiMainnet"
        chain-type = "SUI"
        enabled = false
        l1-rpc = "https://eth.example.com"
        l1-contract-address = "0x1111111111111111111111111111111111111111"
        vault-address = "0x3333333333333333333333333333333333333333"
        use-endpoint = true
    "#;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_and_rekeys_enabled_chains() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), SAMPLE);
        let config = load(tmp.path()).unwrap();
        assert_eq!(config.port, 4000);
        // disabled chains are dropped, keys are lowercased
        assert_eq!(config.chains.len(), 1);
        let chain = config.chains.get("arbitrumone").unwrap();
        assert_eq!(chain.chain_type, ChainType::Evm);
        assert!(!chain.use_endpoint);
        assert_eq!(chain.l2_start_block, 0);
        assert_eq!(
            chain.events_watcher.max_blocks_per_step,
            crate::EventsWatcherConfig::default().max_blocks_per_step
        );
    }

    #[test]
    fn unknown_chain_type_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let broken = SAMPLE.replace("\"EVM\"", "\"COSMOS\"");
        write_config(tmp.path(), &broken);
        match load(tmp.path()).unwrap_err() {
            tbtc_relayer_utils::Error::UnknownChainType {
                chain_type,
                chain_name,
            } => {
                assert_eq!(chain_type, "COSMOS");
                assert!(chain_name.eq_ignore_ascii_case("ArbitrumOne"));
            }
            other => panic!("expected UnknownChainType, got: {other}"),
        }
    }

    #[test]
    fn direct_chain_without_the_l2_side_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let broken =
            SAMPLE.replace("l2-rpc = \"https://arb.example.com\"\n", "");
        write_config(tmp.path(), &broken);
        match load(tmp.path()).unwrap_err() {
            tbtc_relayer_utils::Error::MissingChainField {
                chain_name,
                field,
            } => {
                assert_eq!(chain_name, "ArbitrumOne");
                assert_eq!(field, "l2-rpc");
            }
            other => panic!("expected MissingChainField, got: {other}"),
        }
    }

    #[test]
    fn enabled_chain_without_a_key_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let broken = SAMPLE.replace(
            "private-key = \"0x4444444444444444444444444444444444444444444444444444444444444444\"\n",
            "",
        );
        write_config(tmp.path(), &broken);
        assert!(matches!(
            load(tmp.path()),
            Err(tbtc_relayer_utils::Error::MissingSecrets)
        ));
    }
}
