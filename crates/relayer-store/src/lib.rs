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

//! # Relayer Store Module
//!
//! Durable key→record storage for deposit records, keyed by deposit id.
//! The only persistent state the relayer owns.

use tbtc_relayer_types::{Deposit, DepositId, DepositStatus};
use tbtc_relayer_utils::Result;

/// A module for the JSON-file backed store.
pub mod json;
/// A module for managing in-memory storage of the relayer.
pub mod mem;

pub use json::JsonFileStore;
pub use mem::InMemoryStore;

/// Durable deposit storage.
///
/// Writes are last-writer-wins within a single process; a record must be
/// durable before any on-chain submission that depends on it is sent.
pub trait DepositStore: Send + Sync {
    /// Reads the current state of a deposit, if known.
    fn get(&self, id: &DepositId) -> Result<Option<Deposit>>;

    /// Creates the record only when no record with the same id exists.
    ///
    /// Returns `true` when the record was created. Duplicate intent
    /// events become no-ops through this.
    fn insert_if_absent(&self, deposit: &Deposit) -> Result<bool>;

    /// Overwrites the record. Last writer wins.
    fn put(&self, deposit: &Deposit) -> Result<()>;

    /// Removes a record. Operator tooling only; the core never deletes.
    fn delete(&self, id: &DepositId) -> Result<()>;

    /// Scans all records. Corrupt entries are skipped, not fatal.
    fn list(&self) -> Result<Vec<Deposit>>;

    /// Scans all records with the given status.
    fn list_by_status(&self, status: DepositStatus) -> Result<Vec<Deposit>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }
}
