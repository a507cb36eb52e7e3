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

//! The decoded-event channel between chain listeners and the deposit
//! state machine.
//!
//! Listeners (live subscriptions, the backfill scan, the off-chain
//! endpoint) decode chain payloads into [`RelayerEvent`]s and push them
//! here; the dispatcher drains the channel and runs the matching
//! handler path under the per-deposit lock.

use std::sync::Arc;
use std::time::Duration;

use tbtc_relayer_types::{DepositId, DepositIntent};
use tbtc_relayer_utils::retry::ConstantWithMaxRetryCount;
use tbtc_relayer_utils::{probe, Error};

use crate::ChainHandler;

/// A decoded event relevant to the deposit lifecycle.
#[derive(Debug, Clone)]
pub enum RelayerEvent {
    /// A deposit intent observed on the destination chain.
    DepositInitialized(DepositIntent),
    /// The L1 vault finished optimistic minting for a deposit key.
    MintingFinalized {
        /// The on-chain deposit key.
        deposit_key: DepositId,
    },
}

/// The sending half handed to every listener.
pub type EventSender = tokio::sync::mpsc::Sender<RelayerEvent>;

/// The receiving half owned by the dispatcher.
pub type EventReceiver = tokio::sync::mpsc::Receiver<RelayerEvent>;

/// Drains decoded events for one chain until every sender is gone.
///
/// Each event is retried a bounded number of times; a persistently
/// failing event is dropped with an error log, the reconcile loops pick
/// the deposit up later.
pub async fn run_dispatcher(
    handler: Arc<dyn ChainHandler>,
    mut events: EventReceiver,
) {
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Listener,
        chain = %handler.chain_name(),
        dispatcher_started = true,
    );
    while let Some(event) = events.recv().await {
        dispatch_event(&*handler, event).await;
    }
    tracing::debug!(
        chain = %handler.chain_name(),
        "Event channel closed, dispatcher exiting",
    );
}

const MAX_RETRY_COUNT: usize = 5;

async fn dispatch_event(handler: &dyn ChainHandler, event: RelayerEvent) {
    // a constant backoff with maximum retry count is used here.
    let backoff =
        ConstantWithMaxRetryCount::new(Duration::from_millis(100), MAX_RETRY_COUNT);
    let task = || async {
        match &event {
            RelayerEvent::DepositInitialized(intent) => handler
                .accept_deposit(intent.clone())
                .await
                .map_err(backoff::Error::transient),
            RelayerEvent::MintingFinalized { deposit_key } => handler
                .handle_minting_finalized(*deposit_key)
                .await
                .map_err(backoff::Error::transient),
        }
    };
    let outcome: Result<(), Error> =
        backoff::future::retry(backoff, task).await;
    if let Err(e) = outcome {
        tracing::error!(
            chain = %handler.chain_name(),
            error = %e,
            "Error while handling the event",
        );
    }
}
