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

//! # Relayer Service Module
//!
//! A module for starting the long-running tasks of the relayer.
//!
//! ## Overview
//!
//! For every enabled chain: build its handler, verify connectivity,
//! spawn the event listeners and their dispatcher, then the three
//! reconcile loops. The HTTP surface serves operator queries and the
//! reveal intake for endpoint-fed chains.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tbtc_relayer_chain_handlers::build_chain_handler;
use tbtc_relayer_context::RelayerContext;
use tbtc_relayer_handler_traits::{run_dispatcher, EventSender};
use tbtc_relayer_reconciler::{
    run_finalize_loop, run_initialize_loop, run_past_scan_loop,
};
use tbtc_relayer_utils::probe;

use crate::routes;

/// Shared state of the HTTP surface.
pub struct AppState {
    /// The relayer context.
    pub ctx: RelayerContext,
    /// Per-chain intake senders for the reveal endpoint.
    pub intake: HashMap<String, EventSender>,
}

/// Starts all background services for all chains configured in the
/// config file.
///
/// Returns the per-chain event intake senders; this does not block, the
/// services run on background tasks.
pub async fn ignite(
    ctx: &RelayerContext,
) -> crate::Result<HashMap<String, EventSender>> {
    let mut intake = HashMap::new();
    for (name, chain_config) in &ctx.config.chains {
        tracing::info!(chain = %name, "Starting chain services");
        let handler =
            build_chain_handler(chain_config, ctx.store()).await?;
        handler.initialize().await?;

        let (events_tx, events_rx) = tokio::sync::mpsc::channel(1024);
        handler.setup_listeners(events_tx.clone()).await?;
        tokio::spawn(run_dispatcher(handler.clone(), events_rx));
        tokio::spawn(run_initialize_loop(
            handler.clone(),
            ctx.config.reconciler,
            ctx.shutdown_signal(),
        ));
        tokio::spawn(run_finalize_loop(
            handler.clone(),
            ctx.config.reconciler,
            ctx.shutdown_signal(),
        ));
        tokio::spawn(run_past_scan_loop(
            handler.clone(),
            ctx.config.reconciler,
            ctx.shutdown_signal(),
        ));
        intake.insert(name.clone(), events_tx);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            chain = %name,
            services_started = true,
        );
    }
    Ok(intake)
}

/// Sets up the HTTP server for the relayer: operator queries plus the
/// reveal intake for endpoint-fed chains.
pub async fn build_web_services(
    ctx: RelayerContext,
    intake: HashMap<String, EventSender>,
) -> crate::Result<()> {
    let socket_addr = SocketAddr::new([0, 0, 0, 0].into(), ctx.config.port);
    let api = Router::new()
        .route("/info", get(routes::handle_relayer_info))
        .route("/deposits", get(routes::handle_list_deposits))
        .route("/deposits/:id", get(routes::handle_deposit))
        .route("/reveal/:chain", post(routes::handle_reveal));

    let app = Router::new()
        .nest("/api/v1", api)
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(AppState { ctx, intake }));

    tracing::info!("Starting the server on {}", socket_addr);
    axum::Server::bind(&socket_addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
