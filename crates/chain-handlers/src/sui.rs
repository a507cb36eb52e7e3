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

//! The Sui chain handler.
//!
//! Deposit intents for Sui destinations arrive through the off-chain
//! reveal endpoint; the L1 side of the ceremony is the shared EVM
//! plumbing. Sui's notion of chain progress is a checkpoint sequence
//! number, which an endpoint-fed handler has no use for and reports as
//! zero.

use std::sync::Arc;

use tbtc_relayer_config::ChainConfig;
use tbtc_relayer_handler_traits::{ChainHandler, DepositLocks, EventSender};
use tbtc_relayer_store::DepositStore;
use tbtc_relayer_types::{Deposit, DepositId, DepositStatus};
use tbtc_relayer_utils::{probe, Error, Result};

use crate::evm::l1::L1Ceremony;

/// Relays deposits destined for Sui.
pub struct SuiChainHandler {
    config: ChainConfig,
    l1: L1Ceremony,
    locks: DepositLocks,
}

impl SuiChainHandler {
    /// Connects the L1 side for a Sui destination chain.
    pub async fn connect(
        config: ChainConfig,
        store: Arc<dyn DepositStore>,
    ) -> Result<Self> {
        if !config.use_endpoint {
            return Err(Error::Generic(
                "SUI chains take intents from the reveal endpoint; set use-endpoint",
            ));
        }
        let l1 = L1Ceremony::connect(&config, store).await?;
        Ok(Self {
            config,
            l1,
            locks: DepositLocks::default(),
        })
    }
}

#[async_trait::async_trait]
impl ChainHandler for SuiChainHandler {
    fn chain_name(&self) -> &str {
        &self.config.name
    }

    fn store(&self) -> Arc<dyn DepositStore> {
        self.l1.store()
    }

    fn locks(&self) -> &DepositLocks {
        &self.locks
    }

    async fn initialize(&self) -> Result<()> {
        self.l1.healthcheck().await?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            chain = %self.config.name,
            handler = "sui",
            initialized = true,
        );
        Ok(())
    }

    async fn setup_listeners(&self, events: EventSender) -> Result<()> {
        self.l1.spawn_vault_listener(events);
        Ok(())
    }

    async fn initialize_deposit(&self, deposit: Deposit) -> Result<()> {
        self.l1.initialize_deposit(deposit).await
    }

    async fn finalize_deposit(&self, deposit: Deposit) -> Result<()> {
        self.l1.finalize_deposit(deposit).await
    }

    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<Option<DepositStatus>> {
        self.l1.check_deposit_status(id).await
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(0)
    }

    fn supports_past_deposit_check(&self) -> bool {
        false
    }

    async fn check_for_past_deposits(
        &self,
        _past_minutes: u64,
        _latest_block: u64,
    ) -> Result<()> {
        tracing::trace!(
            chain = %self.config.name,
            "Past deposits scan is a no-op for endpoint-fed chains",
        );
        Ok(())
    }
}
