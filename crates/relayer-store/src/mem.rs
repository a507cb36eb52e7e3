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
use std::sync::Arc;

use parking_lot::RwLock;
use tbtc_relayer_types::{Deposit, DepositId};
use tbtc_relayer_utils::Result;

use crate::DepositStore;

/// InMemoryStore keeps deposit records in a shared map. Test double for
/// the JSON-file store; nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<DepositId, Deposit>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl DepositStore for InMemoryStore {
    fn get(&self, id: &DepositId) -> Result<Option<Deposit>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn insert_if_absent(&self, deposit: &Deposit) -> Result<bool> {
        let mut guard = self.records.write();
        if guard.contains_key(&deposit.id) {
            return Ok(false);
        }
        guard.insert(deposit.id, deposit.clone());
        Ok(true)
    }

    fn put(&self, deposit: &Deposit) -> Result<()> {
        self.records.write().insert(deposit.id, deposit.clone());
        Ok(())
    }

    fn delete(&self, id: &DepositId) -> Result<()> {
        self.records.write().remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Deposit>> {
        Ok(self.records.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::Bytes;
    use tbtc_relayer_types::{
        Deposit, DepositIntent, DepositStatus, FundingTransaction, Reveal,
    };

    use super::*;

    fn sample_deposit() -> Deposit {
        let intent = DepositIntent {
            funding_tx: FundingTransaction {
                version: Bytes::from(vec![0x02, 0x00, 0x00, 0x00]),
                input_vector: Bytes::from(vec![0x0a]),
                output_vector: Bytes::from(vec![0x0b]),
                locktime: Bytes::from(vec![0x00; 4]),
            },
            reveal: Reveal {
                funding_output_index: 0,
                blinding_factor: Bytes::from(vec![0x01; 8]),
                wallet_public_key_hash: Bytes::from(vec![0x02; 20]),
                refund_public_key_hash: Bytes::from(vec![0x03; 20]),
                refund_locktime: Bytes::from(vec![0x04; 4]),
                extra_data: Bytes::from(vec![0x05; 32]),
            },
            l2_deposit_owner: Bytes::from(vec![0x06; 20]),
            l2_sender: Bytes::from(vec![0x07; 20]),
        };
        Deposit::from_intent(&intent, 500).unwrap()
    }

    #[test]
    fn behaves_like_a_store() {
        let store = InMemoryStore::default();
        let mut deposit = sample_deposit();
        assert!(store.insert_if_absent(&deposit).unwrap());
        assert!(!store.insert_if_absent(&deposit).unwrap());
        deposit.mark_initialized(None, 600);
        store.put(&deposit).unwrap();
        assert_eq!(
            store.get(&deposit.id).unwrap().unwrap().status,
            DepositStatus::Initialized
        );
        assert_eq!(
            store.list_by_status(DepositStatus::Initialized).unwrap().len(),
            1
        );
        store.delete(&deposit.id).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
