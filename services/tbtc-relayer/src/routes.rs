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

//! HTTP route handlers: operator queries over the deposit store and the
//! reveal intake for endpoint-fed chains.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ethers::types::U256;
use serde_json::json;

use tbtc_relayer_handler_traits::RelayerEvent;
use tbtc_relayer_types::DepositIntent;

use crate::service::AppState;

/// Error type for HTTP handlers.
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<tbtc_relayer_utils::Error> for HandlerError {
    fn from(value: tbtc_relayer_utils::Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Summary of the relayer and its configured chains.
pub async fn handle_relayer_info(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let chains = state
        .ctx
        .config
        .chains
        .values()
        .map(|chain| {
            json!({
                "name": chain.name,
                "chainType": chain.chain_type.to_string(),
                "useEndpoint": chain.use_endpoint,
            })
        })
        .collect::<Vec<_>>();
    Json(json!({ "chains": chains }))
}

/// Every deposit record the store holds.
pub async fn handle_list_deposits(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let deposits = state.ctx.store().list()?;
    Ok(Json(json!({ "deposits": deposits })))
}

/// A single deposit record by its decimal id.
pub async fn handle_deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let id = U256::from_dec_str(&id).map_err(|e| {
        HandlerError(StatusCode::BAD_REQUEST, format!("invalid deposit id: {e}"))
    })?;
    match state.ctx.store().get(&id)? {
        Some(deposit) => Ok(Json(json!({ "deposit": deposit }))),
        None => Err(HandlerError(
            StatusCode::NOT_FOUND,
            format!("no deposit with id {id}"),
        )),
    }
}

/// Intake for endpoint-fed chains: a posted deposit intent enters the
/// same dispatcher path as a subscribed event would.
pub async fn handle_reveal(
    State(state): State<Arc<AppState>>,
    Path(chain): Path<String>,
    Json(intent): Json<DepositIntent>,
) -> Result<(StatusCode, Json<serde_json::Value>), HandlerError> {
    let sender =
        state.intake.get(&chain.to_lowercase()).ok_or_else(|| {
            HandlerError(
                StatusCode::NOT_FOUND,
                format!("unknown chain: {chain}"),
            )
        })?;
    sender
        .send(RelayerEvent::DepositInitialized(intent))
        .await
        .map_err(|_| {
            HandlerError(
                StatusCode::SERVICE_UNAVAILABLE,
                "event dispatcher is not running".to_string(),
            )
        })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}
