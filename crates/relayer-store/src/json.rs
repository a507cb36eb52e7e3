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

use std::fs;
use std::path::{Path, PathBuf};

use tbtc_relayer_types::{Deposit, DepositId};
use tbtc_relayer_utils::Result;

use crate::DepositStore;

/// A store that persists each deposit as a pretty-printed
/// `<id>.json` file under a data directory.
///
/// Single-process only; concurrent relayers against the same directory
/// are undefined.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Opens the store, creating the data directory on demand.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The directory the records live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &DepositId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl DepositStore for JsonFileStore {
    fn get(&self, id: &DepositId) -> Result<Option<Deposit>> {
        let path = self.record_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn insert_if_absent(&self, deposit: &Deposit) -> Result<bool> {
        if self.record_path(&deposit.id).exists() {
            return Ok(false);
        }
        self.put(deposit)?;
        Ok(true)
    }

    fn put(&self, deposit: &Deposit) -> Result<()> {
        let path = self.record_path(&deposit.id);
        // Write through a sibling temp file so a crash mid-write can
        // never leave a half-written record behind.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(deposit)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, id: &DepositId) -> Result<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Deposit>> {
        let mut deposits = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read deposit record, skipping",
                    );
                    continue;
                }
            };
            match serde_json::from_str::<Deposit>(&raw) {
                Ok(deposit) => deposits.push(deposit),
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "Corrupt deposit record, skipping",
                    );
                }
            }
        }
        Ok(deposits)
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::Bytes;
    use tbtc_relayer_types::{
        Deposit, DepositIntent, DepositStatus, FundingTransaction, Reveal,
    };

    use super::*;

    fn sample_deposit(output_index: u32) -> Deposit {
        let intent = DepositIntent {
            funding_tx: FundingTransaction {
                version: Bytes::from(vec![0x01, 0x00, 0x00, 0x00]),
                input_vector: Bytes::from(vec![0x01]),
                output_vector: Bytes::from(vec![0x02]),
                locktime: Bytes::from(vec![0x00; 4]),
            },
            reveal: Reveal {
                funding_output_index: output_index,
                blinding_factor: Bytes::from(vec![0x11; 8]),
                wallet_public_key_hash: Bytes::from(vec![0x22; 20]),
                refund_public_key_hash: Bytes::from(vec![0x33; 20]),
                refund_locktime: Bytes::from(vec![0x44; 4]),
                extra_data: Bytes::from(vec![0x55; 32]),
            },
            l2_deposit_owner: Bytes::from(vec![0x66; 20]),
            l2_sender: Bytes::from(vec![0x77; 20]),
        };
        Deposit::from_intent(&intent, 1_000).unwrap()
    }

    #[test]
    fn put_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let deposit = sample_deposit(0);
        assert!(store.get(&deposit.id).unwrap().is_none());
        store.put(&deposit).unwrap();
        assert_eq!(store.get(&deposit.id).unwrap(), Some(deposit.clone()));
        // Records are pretty-printed json named after the decimal id.
        let path = tmp.path().join(format!("{}.json", deposit.id));
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains('\n'));
    }

    #[test]
    fn insert_if_absent_preserves_the_first_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let mut first = sample_deposit(0);
        assert!(store.insert_if_absent(&first).unwrap());
        first.record_failure("later attempt", 2_000);
        // Same id again; the stored record must keep its original state.
        let duplicate = sample_deposit(0);
        assert!(!store.insert_if_absent(&duplicate).unwrap());
        let stored = store.get(&first.id).unwrap().unwrap();
        assert!(stored.error.is_none());
        assert_eq!(stored.dates.last_activity_at, 1_000);
    }

    #[test]
    fn list_by_status_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let queued = sample_deposit(0);
        let mut initialized = sample_deposit(1);
        initialized.mark_initialized(None, 2_000);
        store.put(&queued).unwrap();
        store.put(&initialized).unwrap();
        let listed = store.list_by_status(DepositStatus::Queued).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, queued.id);
        assert!(store
            .list_by_status(DepositStatus::Finalized)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn corrupt_records_are_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let deposit = sample_deposit(0);
        store.put(&deposit).unwrap();
        std::fs::write(tmp.path().join("1234.json"), b"{ not json").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, deposit.id);
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let deposit = sample_deposit(0);
        store.put(&deposit).unwrap();
        store.delete(&deposit.id).unwrap();
        assert!(store.get(&deposit.id).unwrap().is_none());
        store.delete(&deposit.id).unwrap();
    }

    #[test]
    fn open_creates_the_data_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("data").join("deposits");
        let store = JsonFileStore::open(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(store.list().unwrap().is_empty());
    }
}
