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

//! tBTC Cross-Chain Deposit Relayer.
//!
//! Observes deposit intents on destination chains and drives each
//! deposit through the two-phase initialize/finalize ceremony on
//! Ethereum.

/// HTTP route handlers.
pub mod routes;
/// Background service wiring.
pub mod service;

pub use tbtc_relayer_utils::Result;
