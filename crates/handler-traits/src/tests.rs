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

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ethers::types::{Bytes, TxHash};
use parking_lot::Mutex;
use tbtc_relayer_store::{DepositStore, InMemoryStore};
use tbtc_relayer_types::{
    get_deposit_id, Deposit, DepositId, DepositIntent, DepositStatus,
    FundingTransaction, Reveal, TIME_TO_RETRY,
};
use tbtc_relayer_utils::now_ms;

use crate::{run_dispatcher, ChainHandler, DepositLocks, RelayerEvent};

/// A handler whose chain is a scripted in-memory map: pre-flight
/// outcomes and on-chain statuses are whatever the test says they are.
#[derive(Default)]
struct ScriptedChainHandler {
    store: Arc<InMemoryStore>,
    locks: DepositLocks,
    /// The chain's view of each deposit. Absent means never registered,
    /// which the depositor contract reports as the zero (QUEUED) status.
    on_chain: Mutex<HashMap<DepositId, DepositStatus>>,
    /// When set, the initialize pre-flight reverts with this reason.
    revert_initialize_with: Mutex<Option<String>>,
    initialize_sends: AtomicUsize,
    finalize_sends: AtomicUsize,
}

impl ScriptedChainHandler {
    fn on_chain_status(&self, id: &DepositId) -> DepositStatus {
        self.on_chain
            .lock()
            .get(id)
            .copied()
            .unwrap_or(DepositStatus::Queued)
    }
}

#[async_trait::async_trait]
impl ChainHandler for ScriptedChainHandler {
    fn chain_name(&self) -> &str {
        "scripted"
    }

    fn store(&self) -> Arc<dyn DepositStore> {
        self.store.clone()
    }

    fn locks(&self) -> &DepositLocks {
        &self.locks
    }

    async fn initialize(&self) -> tbtc_relayer_utils::Result<()> {
        Ok(())
    }

    async fn setup_listeners(
        &self,
        _events: crate::EventSender,
    ) -> tbtc_relayer_utils::Result<()> {
        Ok(())
    }

    async fn initialize_deposit(
        &self,
        mut deposit: Deposit,
    ) -> tbtc_relayer_utils::Result<()> {
        if let Some(reason) = self.revert_initialize_with.lock().clone() {
            deposit.record_failure(reason, now_ms());
            self.store.put(&deposit)?;
            return Ok(());
        }
        self.initialize_sends.fetch_add(1, Ordering::SeqCst);
        self.on_chain
            .lock()
            .insert(deposit.id, DepositStatus::Initialized);
        deposit.mark_initialized(Some(TxHash::from_low_u64_be(0xaa)), now_ms());
        self.store.put(&deposit)?;
        Ok(())
    }

    async fn finalize_deposit(
        &self,
        mut deposit: Deposit,
    ) -> tbtc_relayer_utils::Result<()> {
        if self.on_chain_status(&deposit.id) == DepositStatus::Queued {
            deposit.record_failure("Deposit not initialized", now_ms());
            self.store.put(&deposit)?;
            return Ok(());
        }
        self.finalize_sends.fetch_add(1, Ordering::SeqCst);
        self.on_chain
            .lock()
            .insert(deposit.id, DepositStatus::Finalized);
        deposit.mark_finalized(Some(TxHash::from_low_u64_be(0xbb)), now_ms());
        self.store.put(&deposit)?;
        Ok(())
    }

    async fn check_deposit_status(
        &self,
        id: DepositId,
    ) -> tbtc_relayer_utils::Result<Option<DepositStatus>> {
        Ok(Some(self.on_chain_status(&id)))
    }

    async fn latest_block(&self) -> tbtc_relayer_utils::Result<u64> {
        Ok(0)
    }

    fn supports_past_deposit_check(&self) -> bool {
        false
    }

    async fn check_for_past_deposits(
        &self,
        _past_minutes: u64,
        _latest_block: u64,
    ) -> tbtc_relayer_utils::Result<()> {
        Ok(())
    }
}

fn sample_intent(funding_byte: u8) -> DepositIntent {
    DepositIntent {
        funding_tx: FundingTransaction {
            version: Bytes::from(vec![0x01, 0x00, 0x00, 0x00]),
            input_vector: Bytes::from(vec![funding_byte; 3]),
            output_vector: Bytes::from(vec![0x02; 3]),
            locktime: Bytes::from(vec![0x00; 4]),
        },
        reveal: Reveal {
            funding_output_index: 0,
            blinding_factor: Bytes::from(vec![0x10; 8]),
            wallet_public_key_hash: Bytes::from(vec![0x20; 20]),
            refund_public_key_hash: Bytes::from(vec![0x30; 20]),
            refund_locktime: Bytes::from(vec![0x40; 4]),
            extra_data: Bytes::from(vec![0x50; 32]),
        },
        l2_deposit_owner: Bytes::from(vec![0x60; 20]),
        l2_sender: Bytes::from(vec![0x70; 20]),
    }
}

fn intent_id(intent: &DepositIntent) -> DepositId {
    let deposit = Deposit::from_intent(intent, 0).unwrap();
    deposit.id
}

/// Moves a record's last activity far enough into the past that the
/// five-minute throttle lets the next reconcile pass touch it.
fn expire_throttle(store: &InMemoryStore, id: &DepositId) {
    let mut deposit = store.get(id).unwrap().unwrap();
    deposit.dates.last_activity_at = now_ms()
        .saturating_sub(TIME_TO_RETRY.as_millis() as u64 + 1_000);
    store.put(&deposit).unwrap();
}

#[tokio::test]
#[tracing_test::traced_test]
async fn happy_path_reaches_finalized_with_both_hashes() {
    let handler = ScriptedChainHandler::default();
    let intent = sample_intent(0x11);
    let id = intent_id(&intent);

    handler.accept_deposit(intent).await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Initialized);

    // later the vault signals optimistic minting completion
    handler.handle_minting_finalized(id).await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Finalized);
    assert!(stored.hashes.eth.initialize_tx_hash.is_some());
    assert!(stored.hashes.eth.finalize_tx_hash.is_some());
    let dates = &stored.dates;
    assert!(dates.initialization_at.unwrap() <= dates.finalization_at.unwrap());
    assert!(dates.finalization_at.unwrap() <= dates.last_activity_at);
    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 1);
    assert_eq!(handler.finalize_sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_intents_create_exactly_one_record() {
    let handler = ScriptedChainHandler::default();
    let intent = sample_intent(0x22);
    let id = intent_id(&intent);

    handler.accept_deposit(intent.clone()).await.unwrap();
    handler.accept_deposit(intent).await.unwrap();

    assert_eq!(handler.store.list().unwrap().len(), 1);
    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 1);
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Initialized);
}

#[tokio::test]
async fn preflight_revert_is_recorded_and_recovered_after_throttle() {
    let handler = ScriptedChainHandler::default();
    *handler.revert_initialize_with.lock() = Some("bad reveal".into());
    let intent = sample_intent(0x33);
    let id = intent_id(&intent);

    handler.accept_deposit(intent).await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Queued);
    assert_eq!(stored.error.as_deref(), Some("bad reveal"));
    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 0);

    // within the throttle window the reconcile pass must not touch it
    handler.process_initialize_deposits().await.unwrap();
    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 0);

    // clock moves past the window and the chain accepts the call now
    *handler.revert_initialize_with.lock() = None;
    expire_throttle(&handler.store, &id);
    handler.process_initialize_deposits().await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Initialized);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn restart_midflight_finalizes_without_the_vault_event() {
    let handler = ScriptedChainHandler::default();
    let intent = sample_intent(0x44);
    let id = intent_id(&intent);

    // before the "restart": initialize mined, vault event never seen
    handler.accept_deposit(intent).await.unwrap();
    assert_eq!(
        handler.store.get(&id).unwrap().unwrap().status,
        DepositStatus::Initialized
    );

    expire_throttle(&handler.store, &id);
    handler.process_finalize_deposits().await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Finalized);
    assert!(stored.hashes.eth.finalize_tx_hash.is_some());
    assert_eq!(handler.finalize_sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn queued_record_fast_forwards_when_chain_already_finalized() {
    let handler = ScriptedChainHandler::default();
    let intent = sample_intent(0x55);
    let deposit = Deposit::from_intent(&intent, now_ms()).unwrap();
    let id = deposit.id;
    handler.store.put(&deposit).unwrap();
    // an external relayer completed the whole ceremony
    handler
        .on_chain
        .lock()
        .insert(id, DepositStatus::Finalized);

    expire_throttle(&handler.store, &id);
    handler.process_initialize_deposits().await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Finalized);
    // no transaction was ever sent from here
    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 0);
    assert_eq!(handler.finalize_sends.load(Ordering::SeqCst), 0);
    assert!(stored.hashes.eth.initialize_tx_hash.is_none());
    assert!(stored.hashes.eth.finalize_tx_hash.is_none());
}

#[tokio::test]
async fn queued_record_records_remote_initialize_fact() {
    let handler = ScriptedChainHandler::default();
    let intent = sample_intent(0x56);
    let deposit = Deposit::from_intent(&intent, now_ms()).unwrap();
    let id = deposit.id;
    handler.store.put(&deposit).unwrap();
    handler
        .on_chain
        .lock()
        .insert(id, DepositStatus::Initialized);

    expire_throttle(&handler.store, &id);
    handler.process_initialize_deposits().await.unwrap();
    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Initialized);
    assert!(stored.hashes.eth.initialize_tx_hash.is_none());
    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn throttle_skips_recently_touched_records_in_both_passes() {
    let handler = ScriptedChainHandler::default();
    let queued = Deposit::from_intent(&sample_intent(0x66), now_ms()).unwrap();
    let mut initialized =
        Deposit::from_intent(&sample_intent(0x77), now_ms()).unwrap();
    initialized.mark_initialized(None, now_ms());
    handler.store.put(&queued).unwrap();
    handler.store.put(&initialized).unwrap();
    handler
        .on_chain
        .lock()
        .insert(initialized.id, DepositStatus::Initialized);

    handler.process_initialize_deposits().await.unwrap();
    handler.process_finalize_deposits().await.unwrap();

    assert_eq!(handler.initialize_sends.load(Ordering::SeqCst), 0);
    assert_eq!(handler.finalize_sends.load(Ordering::SeqCst), 0);
    // untouched: the throttle filtered them before any status read
    assert_eq!(
        handler.store.get(&queued.id).unwrap().unwrap().status,
        DepositStatus::Queued
    );
    assert_eq!(
        handler.store.get(&initialized.id).unwrap().unwrap().status,
        DepositStatus::Initialized
    );
}

#[tokio::test]
async fn vault_signal_for_unknown_deposit_is_ignored() {
    let handler = ScriptedChainHandler::default();
    let unknown = get_deposit_id(&"ab".repeat(32), 9).unwrap();
    handler.handle_minting_finalized(unknown).await.unwrap();
    assert!(handler.store.list().unwrap().is_empty());
    assert_eq!(handler.finalize_sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dispatcher_drives_events_to_finalized() {
    let handler = Arc::new(ScriptedChainHandler::default());
    let intent = sample_intent(0x88);
    let id = intent_id(&intent);

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    tx.send(RelayerEvent::DepositInitialized(intent)).await.unwrap();
    tx.send(RelayerEvent::MintingFinalized { deposit_key: id })
        .await
        .unwrap();
    drop(tx);
    run_dispatcher(handler.clone(), rx).await;

    let stored = handler.store.get(&id).unwrap().unwrap();
    assert_eq!(stored.status, DepositStatus::Finalized);
}
