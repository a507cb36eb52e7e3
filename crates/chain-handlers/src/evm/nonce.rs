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

//! Sequenced nonce assignment for the shared signing wallet.
//!
//! Two overlapping reconcile ticks would otherwise both read the same
//! transaction count and collide. The manager keeps a local monotone
//! `next_nonce`, reconciled against the network's pending count before
//! every send.

use std::sync::Arc;

use ethers::providers::{Middleware, ProviderError};
use ethers::types::{Address, BlockNumber, U256};
use tokio::sync::Mutex;

use tbtc_relayer_utils::Result;

/// A per-signer monotone transaction-count cache.
pub struct NonceManager<M> {
    client: Arc<M>,
    address: Address,
    next: Mutex<Option<U256>>,
}

impl<M> NonceManager<M>
where
    M: Middleware<Error = ProviderError>,
{
    /// Creates a manager for the given signer address over a read-only
    /// client.
    pub fn new(client: Arc<M>, address: Address) -> Self {
        Self {
            client,
            address,
            next: Mutex::new(None),
        }
    }

    /// Returns the nonce to use for the next send and advances the
    /// local cache.
    ///
    /// The network's pending transaction count is consulted every time;
    /// whichever of the two is larger wins, so a mined transaction from
    /// elsewhere can only push us forward.
    pub async fn next_nonce(&self) -> Result<U256> {
        let network = self
            .client
            .get_transaction_count(
                self.address,
                Some(BlockNumber::Pending.into()),
            )
            .await?;
        let mut guard = self.next.lock().await;
        let next = match *guard {
            Some(local) => local.max(network),
            None => network,
        };
        *guard = Some(next + 1);
        Ok(next)
    }

    /// Drops the local cache after a failed send; the next fetch starts
    /// over from the network value.
    pub async fn reset(&self) {
        *self.next.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use ethers::providers::Provider;

    use super::*;

    #[tokio::test]
    async fn nonces_are_monotone_and_catch_up_with_the_network() {
        let (provider, mock) = Provider::mocked();
        let manager =
            NonceManager::new(Arc::new(provider), Address::repeat_byte(0x42));

        mock.push(U256::from(5)).unwrap();
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(5));

        // The network lags (our send is still in the mempool); the
        // local cache must win.
        mock.push(U256::from(3)).unwrap();
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(6));

        // A transaction mined from elsewhere pushes the network ahead.
        mock.push(U256::from(10)).unwrap();
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(10));
    }

    #[tokio::test]
    async fn reset_starts_over_from_the_network_value() {
        let (provider, mock) = Provider::mocked();
        let manager =
            NonceManager::new(Arc::new(provider), Address::repeat_byte(0x42));

        mock.push(U256::from(8)).unwrap();
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(8));

        manager.reset().await;
        mock.push(U256::from(4)).unwrap();
        assert_eq!(manager.next_nonce().await.unwrap(), U256::from(4));
    }
}
