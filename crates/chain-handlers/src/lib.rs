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

//! # Chain Handlers Module
//!
//! Concrete [`ChainHandler`](tbtc_relayer_handler_traits::ChainHandler)
//! implementations per destination chain, and the factory that builds
//! them from configuration.
//!
//! Whatever the destination chain, the two-phase ceremony itself always
//! lands on Ethereum; the shared L1 plumbing lives in [`evm::l1`].

/// The EVM handler, the reference implementation.
pub mod evm;
/// The handler factory.
pub mod factory;
/// The Solana handler.
pub mod solana;
/// The Starknet handler.
pub mod starknet;
/// The Sui handler.
pub mod sui;

pub use evm::EvmChainHandler;
pub use factory::build_chain_handler;
pub use solana::SolanaChainHandler;
pub use starknet::StarknetChainHandler;
pub use sui::SuiChainHandler;
