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

//! Builds the right handler for a configured chain.
//!
//! Unknown chain kinds never reach this point: config loading fails
//! startup with `Error::UnknownChainType` first, so the match below is
//! exhaustive over everything that can be configured.

use std::sync::Arc;

use tbtc_relayer_config::{ChainConfig, ChainType};
use tbtc_relayer_handler_traits::ChainHandler;
use tbtc_relayer_store::DepositStore;
use tbtc_relayer_utils::Result;

use crate::{
    EvmChainHandler, SolanaChainHandler, StarknetChainHandler,
    SuiChainHandler,
};

/// Constructs the handler matching the chain's configured kind.
pub async fn build_chain_handler(
    config: &ChainConfig,
    store: Arc<dyn DepositStore>,
) -> Result<Arc<dyn ChainHandler>> {
    tracing::debug!(
        chain = %config.name,
        chain_type = %config.chain_type,
        use_endpoint = config.use_endpoint,
        "Building chain handler",
    );
    let handler: Arc<dyn ChainHandler> = match config.chain_type {
        ChainType::Evm => {
            Arc::new(EvmChainHandler::connect(config.clone(), store).await?)
        }
        ChainType::Starknet => Arc::new(
            StarknetChainHandler::connect(config.clone(), store).await?,
        ),
        ChainType::Sui => {
            Arc::new(SuiChainHandler::connect(config.clone(), store).await?)
        }
        ChainType::Solana => {
            Arc::new(SolanaChainHandler::connect(config.clone(), store).await?)
        }
    };
    Ok(handler)
}
