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

//! The shared L1 side of the ceremony.
//!
//! Whatever the destination chain, `initializeDeposit` and
//! `finalizeDeposit` land on the Ethereum depositor contract, and the
//! vault's `OptimisticMintingFinalized` signal is observed there too.
//! Every send follows the same discipline: pre-flight the call
//! read-only, take the next sequenced nonce, send, await inclusion,
//! persist the outcome.

use std::sync::Arc;
use std::time::Duration;

use ethers::contract::ContractError;
use ethers::core::k256::SecretKey;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use futures::TryFutureExt;

use tbtc_relayer_config::{ChainConfig, EventsWatcherConfig};
use tbtc_relayer_handler_traits::{EventSender, RelayerEvent};
use tbtc_relayer_store::DepositStore;
use tbtc_relayer_types::{Deposit, DepositId, DepositStatus, PrivateKey, RpcUrl};
use tbtc_relayer_utils::{
    now_ms, probe, Error, EthersSignerClient, Result,
};

use super::contracts::{
    self, L1BitcoinDepositor, OptimisticMintingFinalizedFilter, TBTCVault,
};
use super::nonce::NonceManager;

/// How often pending transactions are polled for a receipt.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Builds an HTTP JSON-RPC provider for the given endpoint.
pub(crate) fn build_provider(rpc: &RpcUrl) -> Result<Provider<Http>> {
    let provider = Provider::<Http>::try_from(rpc.as_str())?
        .interval(RECEIPT_POLL_INTERVAL);
    Ok(provider)
}

/// Builds the signing wallet for the given chain id.
pub(crate) fn build_wallet(
    key: &PrivateKey,
    chain_id: u64,
) -> Result<LocalWallet> {
    let secret = SecretKey::from_slice(key.as_bytes())?;
    Ok(LocalWallet::from(secret).with_chain_id(chain_id))
}

/// The L1 plumbing shared by all chain handlers: providers, the signing
/// wallet with its sequenced nonce manager, and the depositor/vault
/// contract bindings at both the signer and a read-only provider.
pub struct L1Ceremony {
    chain_name: String,
    store: Arc<dyn DepositStore>,
    provider: Arc<Provider<Http>>,
    nonces: NonceManager<Provider<Http>>,
    depositor: L1BitcoinDepositor<EthersSignerClient>,
    depositor_ro: L1BitcoinDepositor<Provider<Http>>,
    vault: TBTCVault<Provider<Http>>,
    events_watcher: EventsWatcherConfig,
}

impl L1Ceremony {
    /// Connects to L1 and binds the contracts.
    pub async fn connect(
        config: &ChainConfig,
        store: Arc<dyn DepositStore>,
    ) -> Result<Self> {
        let key = config.private_key.as_ref().ok_or(Error::MissingSecrets)?;
        let provider = Arc::new(build_provider(&config.l1_rpc)?);
        let chain_id = provider.get_chainid().await?.as_u64();
        let wallet = build_wallet(key, chain_id)?;
        let signer_address = wallet.address();
        let signer =
            Arc::new(SignerMiddleware::new((*provider).clone(), wallet));
        let nonces = NonceManager::new(provider.clone(), signer_address);
        let depositor =
            L1BitcoinDepositor::new(config.l1_contract_address, signer);
        let depositor_ro = L1BitcoinDepositor::new(
            config.l1_contract_address,
            provider.clone(),
        );
        let vault = TBTCVault::new(config.vault_address, provider.clone());
        Ok(Self {
            chain_name: config.name.clone(),
            store,
            provider,
            nonces,
            depositor,
            depositor_ro,
            vault,
            events_watcher: config.events_watcher,
        })
    }

    /// The shared deposit store.
    pub fn store(&self) -> Arc<dyn DepositStore> {
        self.store.clone()
    }

    /// Idempotent connectivity check.
    pub async fn healthcheck(&self) -> Result<()> {
        let chain_id = self.provider.get_chainid().await?;
        let block = self.provider.get_block_number().await?;
        tracing::debug!(
            chain = %self.chain_name,
            l1_chain_id = %chain_id,
            l1_block = %block,
            "L1 connection healthy",
        );
        Ok(())
    }

    /// Registers the deposit with the L1 depositor.
    ///
    /// Pre-flight revert → the reason goes on the record and no gas is
    /// spent. Transport failures propagate and are retried by the next
    /// reconcile tick.
    #[tracing::instrument(
        skip_all,
        fields(chain = %self.chain_name, deposit_id = %deposit.id),
    )]
    pub async fn initialize_deposit(&self, mut deposit: Deposit) -> Result<()> {
        let funding_tx =
            contracts::encode_funding_tx(&deposit.l1_output_event.funding_tx)?;
        let reveal = contracts::encode_reveal(&deposit.l1_output_event.reveal)?;
        let owner = contracts::owner_to_bytes32(
            &deposit.l1_output_event.l2_deposit_owner,
        )?;
        let mut call =
            self.depositor.initialize_deposit(funding_tx, reveal, owner);

        if let Err(e) = call.call().await {
            return self.preflight_failed("initializeDeposit", deposit, e);
        }

        let nonce = self.nonces.next_nonce().await?;
        call.tx.set_nonce(nonce);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxSubmission,
            chain = %self.chain_name,
            call = "initializeDeposit",
            deposit_id = %deposit.id,
            %nonce,
        );
        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonces.reset().await;
                let reason = revert_reason(&e);
                tracing::error!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    %reason,
                    "Failed to send initializeDeposit",
                );
                deposit.record_failure(reason, now_ms());
                self.store.put(&deposit)?;
                return Ok(());
            }
        };
        match pending.await? {
            Some(receipt) if receipt.status == Some(1u64.into()) => {
                deposit.mark_initialized(
                    Some(receipt.transaction_hash),
                    now_ms(),
                );
                self.store.put(&deposit)?;
                tracing::info!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    tx_hash = ?receipt.transaction_hash,
                    "Deposit initialized",
                );
            }
            Some(receipt) => {
                tracing::error!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    tx_hash = ?receipt.transaction_hash,
                    "initializeDeposit mined but reverted",
                );
                deposit
                    .record_failure("Transaction reverted on-chain", now_ms());
                self.store.put(&deposit)?;
            }
            None => {
                tracing::warn!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    "initializeDeposit dropped from mempool",
                );
                deposit.record_failure(
                    "Transaction dropped from mempool",
                    now_ms(),
                );
                self.store.put(&deposit)?;
            }
        }
        Ok(())
    }

    /// Completes the ceremony for an initialized deposit.
    ///
    /// The pre-flight also quotes the native value the contract forwards
    /// to L2 messaging; the send carries exactly that value.
    #[tracing::instrument(
        skip_all,
        fields(chain = %self.chain_name, deposit_id = %deposit.id),
    )]
    pub async fn finalize_deposit(&self, mut deposit: Deposit) -> Result<()> {
        let call = self.depositor.finalize_deposit(deposit.id);
        let required_value = match call.call().await {
            Ok(value) => value,
            Err(e) => {
                return self.preflight_failed("finalizeDeposit", deposit, e)
            }
        };

        let mut call = call.value(required_value);
        let nonce = self.nonces.next_nonce().await?;
        call.tx.set_nonce(nonce);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxSubmission,
            chain = %self.chain_name,
            call = "finalizeDeposit",
            deposit_id = %deposit.id,
            value = %required_value,
            %nonce,
        );
        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonces.reset().await;
                let reason = revert_reason(&e);
                tracing::error!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    %reason,
                    "Failed to send finalizeDeposit",
                );
                deposit.record_failure(reason, now_ms());
                self.store.put(&deposit)?;
                return Ok(());
            }
        };
        match pending.await? {
            Some(receipt) if receipt.status == Some(1u64.into()) => {
                deposit
                    .mark_finalized(Some(receipt.transaction_hash), now_ms());
                self.store.put(&deposit)?;
                tracing::info!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    tx_hash = ?receipt.transaction_hash,
                    "Deposit finalized",
                );
            }
            Some(receipt) => {
                tracing::error!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    tx_hash = ?receipt.transaction_hash,
                    "finalizeDeposit mined but reverted",
                );
                deposit
                    .record_failure("Transaction reverted on-chain", now_ms());
                self.store.put(&deposit)?;
            }
            None => {
                tracing::warn!(
                    chain = %self.chain_name,
                    deposit_id = %deposit.id,
                    "finalizeDeposit dropped from mempool",
                );
                deposit.record_failure(
                    "Transaction dropped from mempool",
                    now_ms(),
                );
                self.store.put(&deposit)?;
            }
        }
        Ok(())
    }

    /// Reads the deposit's status from the depositor contract.
    pub async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<Option<DepositStatus>> {
        let raw = self.depositor_ro.deposits(id).call().await?;
        if raw > u8::MAX.into() {
            return Ok(None);
        }
        Ok(DepositStatus::try_from(raw.as_u32() as u8).ok())
    }

    /// Spawns the vault watcher, pushing `OptimisticMintingFinalized`
    /// signals into the dispatcher channel.
    pub fn spawn_vault_listener(&self, events: EventSender) {
        let vault = self.vault.clone();
        let provider = self.provider.clone();
        let chain_name = self.chain_name.clone();
        let poll_interval =
            Duration::from_millis(self.events_watcher.polling_interval);
        let step = self.events_watcher.max_blocks_per_step;
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
                    listener = "vault",
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
                        let found = vault
                            .event::<OptimisticMintingFinalizedFilter>()
                            .from_block(cursor + 1)
                            .to_block(dest)
                            .query()
                            .map_err(Into::into)
                            .map_err(backoff::Error::transient)
                            .await?;
                        for event in found {
                            tracing::debug!(
                                chain = %chain_name,
                                deposit_key = %event.deposit_key,
                                "Vault signalled optimistic minting",
                            );
                            let _ = events
                                .send(RelayerEvent::MintingFinalized {
                                    deposit_key: event.deposit_key,
                                })
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
                    "Vault listener stopped",
                );
            }
        });
    }

    fn preflight_failed<M: Middleware>(
        &self,
        which: &str,
        mut deposit: Deposit,
        error: ContractError<M>,
    ) -> Result<()>
    where
        Error: From<ContractError<M>>,
    {
        if error.as_revert().is_none() {
            // Not a revert: transport trouble, nothing to record.
            return Err(error.into());
        }
        let reason = revert_reason(&error);
        tracing::warn!(
            chain = %self.chain_name,
            deposit_id = %deposit.id,
            call = which,
            %reason,
            "Pre-flight reverted, not sending",
        );
        deposit.record_failure(reason, now_ms());
        self.store.put(&deposit)?;
        Ok(())
    }
}

/// The human-readable revert reason of a contract error.
fn revert_reason<M: Middleware>(error: &ContractError<M>) -> String {
    error
        .decode_revert::<String>()
        .unwrap_or_else(|| error.to_string())
}
