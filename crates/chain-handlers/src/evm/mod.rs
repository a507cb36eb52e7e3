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

//! The EVM chain handler, the reference implementation.
//!
//! Deposit intents are observed through a polling watcher over the L2
//! depositor's `DepositInitialized` events, with the historical
//! backfill covering anything the live watcher missed.

use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use futures::TryFutureExt;

use tbtc_relayer_config::ChainConfig;
use tbtc_relayer_handler_traits::{
    ChainHandler, DepositLocks, EventSender, RelayerEvent,
};
use tbtc_relayer_store::DepositStore;
use tbtc_relayer_types::{
    Deposit, DepositId, DepositIntent, DepositStatus,
};
use tbtc_relayer_utils::{
    now_ms, now_secs, probe, Error, EthersSignerClient, Result,
};

/// Block-by-timestamp location for the historical backfill.
pub mod block_locator;
/// Typed contract bindings and record↔ABI conversions.
pub mod contracts;
/// The shared L1 side of the ceremony.
pub mod l1;
/// Sequenced nonce assignment for the signing wallet.
pub mod nonce;

use block_locator::find_block_range;
use contracts::{DepositInitializedFilter, L2BitcoinDepositor};
use l1::L1Ceremony;

/// The L2 side of an EVM destination chain: a provider for block
/// queries and the depositor binding at the L2 signer.
struct L2Connection {
    provider: Arc<Provider<Http>>,
    depositor: L2BitcoinDepositor<EthersSignerClient>,
}

/// Relays deposits destined for an EVM rollup.
pub struct EvmChainHandler {
    config: ChainConfig,
    l1: L1Ceremony,
    l2: Option<L2Connection>,
    locks: DepositLocks,
}

impl EvmChainHandler {
    /// Connects providers, wallets and contract bindings for the chain.
    ///
    /// Endpoint-fed chains skip the L2 side entirely; their intents
    /// arrive through the off-chain reveal endpoint.
    pub async fn connect(
        config: ChainConfig,
        store: Arc<dyn DepositStore>,
    ) -> Result<Self> {
        let l1 = L1Ceremony::connect(&config, store).await?;
        let l2 = if config.use_endpoint {
            None
        } else {
            let rpc = config.l2_rpc.as_ref().ok_or_else(|| {
                Error::MissingChainField {
                    chain_name: config.name.clone(),
                    field: "l2-rpc",
                }
            })?;
            let address = config.l2_contract_address.ok_or_else(|| {
                Error::MissingChainField {
                    chain_name: config.name.clone(),
                    field: "l2-contract-address",
                }
            })?;
            let key =
                config.private_key.as_ref().ok_or(Error::MissingSecrets)?;
            let provider = Arc::new(l1::build_provider(rpc)?);
            let chain_id = provider.get_chainid().await?.as_u64();
            let wallet = l1::build_wallet(key, chain_id)?;
            let signer =
                Arc::new(SignerMiddleware::new((*provider).clone(), wallet));
            let depositor = L2BitcoinDepositor::new(address, signer);
            Some(L2Connection { provider, depositor })
        };
        Ok(Self {
            config,
            l1,
            l2,
            locks: DepositLocks::default(),
        })
    }

    fn spawn_l2_listener(&self, l2: &L2Connection, events: EventSender) {
        let depositor = l2.depositor.clone();
        let provider = l2.provider.clone();
        let chain_name = self.config.name.clone();
        let poll_interval =
            Duration::from_millis(self.config.events_watcher.polling_interval);
        let step = self.config.events_watcher.max_blocks_per_step;
        tokio::spawn(async move {
            let backoff =
                backoff::backoff::Constant::new(Duration::from_secs(1));
            let task = || async {
                let mut cursor = provider
                    .get_block_number()
                    .map_err(Into::into)
                    .map_err(backoff::Error::transient)
                    .await?
                    .as_u64();
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Listener,
                    chain = %chain_name,
                    listener = "l2_depositor",
                    from_block = cursor,
                );
                loop {
                    tokio::time::sleep(poll_interval).await;
                    let latest = provider
                        .get_block_number()
                        .map_err(Into::into)
                        .map_err(backoff::Error::transient)
                        .await?
                        .as_u64();
                    while cursor < latest {
                        let dest = (cursor + step).min(latest);
                        let found = depositor
                            .event::<DepositInitializedFilter>()
                            .from_block(cursor + 1)
                            .to_block(dest)
                            .query()
                            .map_err(Into::into)
                            .map_err(backoff::Error::transient)
                            .await?;
                        for event in found {
                            tracing::debug!(
                                chain = %chain_name,
                                "Observed DepositInitialized on L2",
                            );
                            let intent: DepositIntent = event.into();
                            let _ = events
                                .send(RelayerEvent::DepositInitialized(intent))
                                .await;
                        }
                        cursor = dest;
                    }
                }
            };
            let outcome: std::result::Result<(), Error> =
                backoff::future::retry(backoff, task).await;
            if let Err(e) = outcome {
                tracing::error!(
                    chain = %chain_name,
                    error = %e,
                    "L2 deposit listener stopped",
                );
            }
        });
    }
}

#[async_trait::async_trait]
impl ChainHandler for EvmChainHandler {
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
        if let Some(l2) = &self.l2 {
            let chain_id = l2.provider.get_chainid().await?;
            tracing::debug!(
                chain = %self.config.name,
                l2_chain_id = %chain_id,
                "L2 connection healthy",
            );
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            chain = %self.config.name,
            handler = "evm",
            initialized = true,
        );
        Ok(())
    }

    async fn setup_listeners(&self, events: EventSender) -> Result<()> {
        self.l1.spawn_vault_listener(events.clone());
        if let Some(l2) = &self.l2 {
            self.spawn_l2_listener(l2, events);
        }
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
        match &self.l2 {
            Some(l2) => Ok(l2.provider.get_block_number().await?.as_u64()),
            None => Ok(0),
        }
    }

    fn supports_past_deposit_check(&self) -> bool {
        self.l2.is_some()
    }

    async fn check_for_past_deposits(
        &self,
        past_minutes: u64,
        latest_block: u64,
    ) -> Result<()> {
        let Some(l2) = &self.l2 else {
            return Ok(());
        };
        let target = now_secs().saturating_sub(past_minutes * 60);
        let range = match find_block_range(
            l2.provider.as_ref(),
            target,
            self.config.l2_start_block,
            latest_block,
        )
        .await
        {
            Ok(range) => range,
            Err(e) => {
                tracing::error!(
                    chain = %self.config.name,
                    error = %e,
                    "Failed to locate the backfill block range",
                );
                return Ok(());
            }
        };
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Backfill,
            chain = %self.config.name,
            start_block = range.start_block,
            end_block = range.end_block,
            past_minutes,
        );
        let found = match l2
            .depositor
            .event::<DepositInitializedFilter>()
            .from_block(range.start_block)
            .to_block(range.end_block)
            .query()
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(
                    chain = %self.config.name,
                    error = %e,
                    "Backfill events query failed",
                );
                return Ok(());
            }
        };
        for event in found {
            let intent: DepositIntent = event.into();
            // Key by the derived deposit id; records the live listener
            // already created are left alone.
            let id = match Deposit::from_intent(&intent, now_ms()) {
                Ok(deposit) => deposit.id,
                Err(e) => {
                    tracing::error!(
                        chain = %self.config.name,
                        error = %e,
                        "Skipping malformed past deposit event",
                    );
                    continue;
                }
            };
            match self.store().get(&id) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        chain = %self.config.name,
                        deposit_id = %id,
                        error = %e,
                        "Failed to read the store during backfill",
                    );
                    continue;
                }
            }
            tracing::info!(
                chain = %self.config.name,
                deposit_id = %id,
                "Backfill found a missed deposit intent",
            );
            if let Err(e) = self.accept_deposit(intent).await {
                tracing::error!(
                    chain = %self.config.name,
                    deposit_id = %id,
                    error = %e,
                    "Failed to queue past deposit",
                );
            }
        }
        Ok(())
    }
}
