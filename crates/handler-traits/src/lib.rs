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

//! # Chain Handler Traits Module
//!
//! The per-destination-chain handler abstraction and the shared deposit
//! state machine.
//!
//! Handlers implement the chain-specific verbs (pre-flight, send,
//! status read, event intake); the QUEUED→INITIALIZED→FINALIZED control
//! flow is provided here so every chain runs exactly the same machine.

use std::collections::HashMap;
use std::sync::Arc;

use tbtc_relayer_store::DepositStore;
use tbtc_relayer_types::{Deposit, DepositId, DepositIntent, DepositStatus};
use tbtc_relayer_utils::{now_ms, probe, Result};

/// The decoded event channel and its dispatcher task.
pub mod dispatcher;
#[cfg(test)]
mod tests;

pub use dispatcher::{run_dispatcher, EventSender, RelayerEvent};

/// A keyed async lock serializing all work on a single deposit.
///
/// The event dispatcher and the reconcile passes may both pick up the
/// same deposit; whoever holds its lock runs first, the other observes
/// the updated record. Handler verb implementations must not take these
/// locks themselves, the provided trait methods do.
#[derive(Clone, Default)]
pub struct DepositLocks {
    inner: Arc<parking_lot::Mutex<LockMap>>,
}

type LockMap = HashMap<DepositId, Arc<tokio::sync::Mutex<()>>>;

impl DepositLocks {
    /// Acquires the lock for the given deposit id, creating it on first
    /// use. The registry guard is synchronous and never held across an
    /// await.
    pub async fn lock(
        &self,
        id: DepositId,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut guard = self.inner.lock();
            guard.entry(id).or_default().clone()
        };
        entry.lock_owned().await
    }
}

/// A per-destination-chain adapter exposing the uniform verb set.
///
/// Implementations supply the chain mechanics; the deposit state
/// machine itself lives in the provided methods and is identical for
/// every chain.
#[async_trait::async_trait]
pub trait ChainHandler: Send + Sync {
    /// The human-readable chain name, for logs.
    fn chain_name(&self) -> &str;

    /// The shared deposit store.
    fn store(&self) -> Arc<dyn DepositStore>;

    /// The per-deposit lock registry for this handler.
    fn locks(&self) -> &DepositLocks;

    /// Idempotent connectivity check, run once at startup before any
    /// listeners or loops are spawned.
    async fn initialize(&self) -> Result<()>;

    /// Spawns the chain's event listeners, feeding decoded events into
    /// the dispatcher channel.
    async fn setup_listeners(&self, events: EventSender) -> Result<()>;

    /// Drives one deposit through the L1 `initializeDeposit` ceremony:
    /// pre-flight, send, await inclusion, persist the outcome.
    ///
    /// A pre-flight revert records the reason on the deposit and
    /// returns `Ok`; only transport-level failures are errors.
    async fn initialize_deposit(&self, deposit: Deposit) -> Result<()>;

    /// Drives one deposit through the L1 `finalizeDeposit` ceremony.
    async fn finalize_deposit(&self, deposit: Deposit) -> Result<()>;

    /// Reads the deposit's status from the L1 depositor contract.
    /// Unmappable on-chain values come back as `None`.
    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> Result<Option<DepositStatus>>;

    /// The chain's latest block (or checkpoint sequence / slot).
    /// Endpoint-fed handlers report `0`.
    async fn latest_block(&self) -> Result<u64>;

    /// Whether this handler can scan the chain for past deposit intents.
    /// True iff it subscribes to L2 events directly.
    fn supports_past_deposit_check(&self) -> bool;

    /// Scans the last `past_minutes` of L2 history for deposit intents
    /// this relayer missed, queueing any unknown ones. Errors are
    /// logged, never thrown.
    async fn check_for_past_deposits(
        &self,
        past_minutes: u64,
        latest_block: u64,
    ) -> Result<()>;

    /// Intake for one decoded deposit intent, from a live listener, the
    /// backfill scan or the off-chain endpoint.
    ///
    /// Write-if-absent keeps duplicate events no-ops; a fresh record is
    /// immediately pushed towards `INITIALIZED`.
    async fn accept_deposit(&self, intent: DepositIntent) -> Result<()> {
        let deposit = Deposit::from_intent(&intent, now_ms())?;
        let id = deposit.id;
        let _guard = self.locks().lock(id).await;
        let created = self.store().insert_if_absent(&deposit)?;
        if created {
            tracing::info!(
                chain = %self.chain_name(),
                deposit_id = %id,
                "Queued new deposit",
            );
        } else {
            tracing::debug!(
                chain = %self.chain_name(),
                deposit_id = %id,
                "Deposit already known, ignoring duplicate intent",
            );
        }
        let Some(deposit) = self.store().get(&id)? else {
            return Ok(());
        };
        // Only a still-queued record needs the initialize push; for
        // anything further along the duplicate intent is a no-op.
        if deposit.status == DepositStatus::Queued {
            self.initialize_deposit(deposit).await?;
        }
        Ok(())
    }

    /// The vault signalled optimistic minting completion for a deposit
    /// key. Unknown keys were never relayed by this instance and are
    /// ignored.
    async fn handle_minting_finalized(&self, deposit_key: DepositId) -> Result<()> {
        let _guard = self.locks().lock(deposit_key).await;
        match self.store().get(&deposit_key)? {
            Some(deposit) if deposit.status != DepositStatus::Finalized => {
                tracing::info!(
                    chain = %self.chain_name(),
                    deposit_id = %deposit_key,
                    "Vault signalled minting, finalizing deposit",
                );
                self.finalize_deposit(deposit).await
            }
            Some(_) => {
                tracing::debug!(
                    chain = %self.chain_name(),
                    deposit_id = %deposit_key,
                    "Vault signal for an already finalized deposit",
                );
                Ok(())
            }
            None => {
                tracing::debug!(
                    chain = %self.chain_name(),
                    deposit_id = %deposit_key,
                    "Vault signal for a deposit we never relayed, ignoring",
                );
                Ok(())
            }
        }
    }

    /// One QUEUED→INITIALIZED reconcile pass over the store.
    async fn process_initialize_deposits(&self) -> Result<()> {
        let queued = self.store().list_by_status(DepositStatus::Queued)?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Reconcile,
            chain = %self.chain_name(),
            pass = "initialize",
            candidates = queued.len(),
        );
        for candidate in queued {
            let _guard = self.locks().lock(candidate.id).await;
            // Re-read under the lock; the event path may have advanced
            // the record while we were waiting.
            let Some(mut deposit) = self.store().get(&candidate.id)? else {
                continue;
            };
            if deposit.status != DepositStatus::Queued {
                continue;
            }
            if !deposit.eligible_for_retry(now_ms()) {
                continue;
            }
            deposit.touch(now_ms());
            self.store().put(&deposit)?;
            match self.check_deposit_status(deposit.id).await {
                Ok(Some(DepositStatus::Initialized)) => {
                    // Another relayer won the initialize race; record
                    // the remote fact, there is no tx hash to keep.
                    deposit.mark_initialized(None, now_ms());
                    self.store().put(&deposit)?;
                    tracing::info!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        "Deposit already initialized on chain",
                    );
                }
                Ok(Some(DepositStatus::Finalized)) => {
                    deposit.mark_finalized(None, now_ms());
                    self.store().put(&deposit)?;
                    tracing::info!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        "Deposit already finalized on chain",
                    );
                }
                Ok(Some(DepositStatus::Queued)) => {
                    if let Err(e) = self.initialize_deposit(deposit).await {
                        tracing::error!(
                            chain = %self.chain_name(),
                            deposit_id = %candidate.id,
                            error = %e,
                            "Failed to initialize deposit",
                        );
                    }
                }
                Ok(None) => {
                    tracing::warn!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        "Unknown on-chain deposit state, skipping",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        error = %e,
                        "Transient failure reading deposit status",
                    );
                }
            }
        }
        Ok(())
    }

    /// One INITIALIZED→FINALIZED reconcile pass over the store.
    async fn process_finalize_deposits(&self) -> Result<()> {
        let initialized =
            self.store().list_by_status(DepositStatus::Initialized)?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::TRACE,
            kind = %probe::Kind::Reconcile,
            chain = %self.chain_name(),
            pass = "finalize",
            candidates = initialized.len(),
        );
        for candidate in initialized {
            let _guard = self.locks().lock(candidate.id).await;
            let Some(mut deposit) = self.store().get(&candidate.id)? else {
                continue;
            };
            if deposit.status != DepositStatus::Initialized {
                continue;
            }
            if !deposit.eligible_for_retry(now_ms()) {
                continue;
            }
            deposit.touch(now_ms());
            self.store().put(&deposit)?;
            match self.check_deposit_status(deposit.id).await {
                Ok(Some(DepositStatus::Initialized)) => {
                    if let Err(e) = self.finalize_deposit(deposit).await {
                        tracing::error!(
                            chain = %self.chain_name(),
                            deposit_id = %candidate.id,
                            error = %e,
                            "Failed to finalize deposit",
                        );
                    }
                }
                Ok(Some(DepositStatus::Finalized)) => {
                    deposit.mark_finalized(None, now_ms());
                    self.store().put(&deposit)?;
                    tracing::info!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        "Deposit already finalized on chain",
                    );
                }
                Ok(other) => {
                    tracing::warn!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        on_chain = ?other,
                        "Unexpected on-chain deposit state, skipping",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        chain = %self.chain_name(),
                        deposit_id = %deposit.id,
                        error = %e,
                        "Transient failure reading deposit status",
                    );
                }
            }
        }
        Ok(())
    }
}
