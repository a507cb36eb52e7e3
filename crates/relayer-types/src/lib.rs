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

//! # Relayer Types Module
//!
//! The deposit record model with its lifecycle transitions, plus small
//! configuration newtypes that support reading secrets from the
//! environment.

/// The deposit record, its status machine and the id derivation.
pub mod deposit;
/// PrivateKey newtype with env-var indirection.
pub mod private_key;
/// RpcUrl newtype with env-var indirection.
pub mod rpc_url;

pub use deposit::*;
pub use private_key::PrivateKey;
pub use rpc_url::RpcUrl;
