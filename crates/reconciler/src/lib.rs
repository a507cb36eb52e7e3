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

//! # Reconciler Module
//!
//! The periodic loops that nudge every persisted deposit forward:
//! QUEUED records towards INITIALIZED, INITIALIZED records towards
//! FINALIZED, plus the historical scan for intents the live listeners
//! missed.
//!
//! Loops are tolerant: a failed tick is logged and the next tick
//! proceeds. There is no bounded retry count; the per-record activity
//! throttle is the only pacing.

use std::sync::Arc;
use std::time::Duration;

use tbtc_relayer_config::ReconcilerConfig;
use tbtc_relayer_context::Shutdown;
use tbtc_relayer_handler_traits::ChainHandler;
use tbtc_relayer_utils::probe;

/// Drives `process_initialize_deposits` on a fixed interval until
/// shutdown.
pub async fn run_initialize_loop(
    handler: Arc<dyn ChainHandler>,
    config: ReconcilerConfig,
    mut shutdown: Shutdown,
) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.initialize_interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(
                    chain = %handler.chain_name(),
                    "Initialize loop shutting down",
                );
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = handler.process_initialize_deposits().await {
                    tracing::error!(
                        chain = %handler.chain_name(),
                        error = %e,
                        "Initialize pass failed",
                    );
                }
            }
        }
    }
}

/// Drives `process_finalize_deposits` on a fixed interval until
/// shutdown.
pub async fn run_finalize_loop(
    handler: Arc<dyn ChainHandler>,
    config: ReconcilerConfig,
    mut shutdown: Shutdown,
) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.finalize_interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(
                    chain = %handler.chain_name(),
                    "Finalize loop shutting down",
                );
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = handler.process_finalize_deposits().await {
                    tracing::error!(
                        chain = %handler.chain_name(),
                        error = %e,
                        "Finalize pass failed",
                    );
                }
            }
        }
    }
}

/// Periodically scans the chain for deposit intents the live listeners
/// missed. Exits immediately for handlers that cannot scan.
pub async fn run_past_scan_loop(
    handler: Arc<dyn ChainHandler>,
    config: ReconcilerConfig,
    mut shutdown: Shutdown,
) {
    if !handler.supports_past_deposit_check() {
        tracing::debug!(
            chain = %handler.chain_name(),
            "Past deposits scan not supported, loop not started",
        );
        return;
    }
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.past_scan_interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(
                    chain = %handler.chain_name(),
                    "Past deposits scan loop shutting down",
                );
                break;
            }
            _ = ticker.tick() => {
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::TRACE,
                    kind = %probe::Kind::Backfill,
                    chain = %handler.chain_name(),
                    tick = true,
                );
                let latest_block = match handler.latest_block().await {
                    Ok(latest_block) => latest_block,
                    Err(e) => {
                        tracing::warn!(
                            chain = %handler.chain_name(),
                            error = %e,
                            "Failed to fetch the latest block, skipping scan",
                        );
                        continue;
                    }
                };
                if let Err(e) = handler
                    .check_for_past_deposits(config.past_minutes, latest_block)
                    .await
                {
                    tracing::error!(
                        chain = %handler.chain_name(),
                        error = %e,
                        "Past deposits scan failed",
                    );
                }
            }
        }
    }
}
