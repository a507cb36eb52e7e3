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

//! The per-deposit record and its lifecycle.
//!
//! A deposit is created when a deposit intent is observed on the
//! destination chain (or arrives through the off-chain endpoint), then is
//! driven through the two-phase L1 ceremony: `QUEUED` → `INITIALIZED` →
//! `FINALIZED`. The record never moves backwards; every touch bumps
//! `lastActivityAt`, which rate-limits reconcile retries.

use std::time::Duration;

use ethers::types::{Bytes, TxHash, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tbtc_relayer_utils::{Error, Result};

/// The derived deposit key, matching the on-chain `uint256` deposit key.
pub type DepositId = U256;

/// Minimum interval between reconcile touches of the same record.
pub const TIME_TO_RETRY: Duration = Duration::from_secs(5 * 60);

/// Deposit lifecycle status. The numeric values match the on-chain
/// statuses returned by `L1BitcoinDepositor.deposits(id)`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum DepositStatus {
    /// Observed on L2, not yet registered with the L1 depositor.
    Queued,
    /// Registered with the L1 depositor, awaiting optimistic minting.
    Initialized,
    /// Ceremony complete. Terminal.
    Finalized,
}

impl From<DepositStatus> for u8 {
    fn from(status: DepositStatus) -> Self {
        match status {
            DepositStatus::Queued => 0,
            DepositStatus::Initialized => 1,
            DepositStatus::Finalized => 2,
        }
    }
}

impl TryFrom<u8> for DepositStatus {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(DepositStatus::Queued),
            1 => Ok(DepositStatus::Initialized),
            2 => Ok(DepositStatus::Finalized),
            v => Err(format!("unknown deposit status: {v}")),
        }
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositStatus::Queued => write!(f, "QUEUED"),
            DepositStatus::Initialized => write!(f, "INITIALIZED"),
            DepositStatus::Finalized => write!(f, "FINALIZED"),
        }
    }
}

/// The raw Bitcoin funding transaction, split the way the L1 depositor
/// expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingTransaction {
    /// 4-byte transaction version.
    pub version: Bytes,
    /// Serialized transaction inputs.
    pub input_vector: Bytes,
    /// Serialized transaction outputs.
    pub output_vector: Bytes,
    /// 4-byte transaction locktime.
    pub locktime: Bytes,
}

/// The positional reveal tuple carried by the deposit-intent event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reveal {
    /// Index of the deposit output in the funding transaction.
    pub funding_output_index: u32,
    /// 8-byte blinding factor.
    pub blinding_factor: Bytes,
    /// 20-byte wallet public key hash.
    pub wallet_public_key_hash: Bytes,
    /// 20-byte refund public key hash.
    pub refund_public_key_hash: Bytes,
    /// 4-byte refund locktime.
    pub refund_locktime: Bytes,
    /// 32-byte chain-specific extra data.
    pub extra_data: Bytes,
}

/// A decoded deposit-intent event, chain-agnostic.
///
/// EVM handlers decode this out of the L2 `DepositInitialized` log; the
/// off-chain endpoint posts it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositIntent {
    /// The raw Bitcoin funding transaction.
    pub funding_tx: FundingTransaction,
    /// The reveal parameters.
    pub reveal: Reveal,
    /// The account that will receive the minted tokens on L2.
    pub l2_deposit_owner: Bytes,
    /// The account that emitted the intent on L2.
    pub l2_sender: Bytes,
}

/// The deposit receipt, opaque byte strings lifted from the intent event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReceipt {
    /// The depositor address as seen on L2.
    pub depositor: String,
    /// 8-byte blinding factor.
    pub blinding_factor: Bytes,
    /// 20-byte wallet public key hash.
    pub wallet_public_key_hash: Bytes,
    /// 20-byte refund public key hash.
    pub refund_public_key_hash: Bytes,
    /// 4-byte refund locktime.
    pub refund_locktime: Bytes,
    /// 32-byte chain-specific extra data.
    pub extra_data: Bytes,
}

/// Everything the L1 `initializeDeposit` call needs, as observed on L2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1OutputEvent {
    /// The raw Bitcoin funding transaction.
    pub funding_tx: FundingTransaction,
    /// The raw reveal tuple.
    pub reveal: Reveal,
    /// The deposit owner, raw bytes as emitted on L2.
    pub l2_deposit_owner: Bytes,
    /// The intent sender, raw bytes as emitted on L2.
    pub l2_sender: Bytes,
}

/// Hashes of the L1 ceremony transactions, when this relayer sent them.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct EthereumTxHashes {
    /// Hash of the mined `initializeDeposit` transaction.
    pub initialize_tx_hash: Option<TxHash>,
    /// Hash of the mined `finalizeDeposit` transaction.
    pub finalize_tx_hash: Option<TxHash>,
}

/// Transaction hashes grouped by settlement chain.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct TxHashes {
    /// The Ethereum (L1) ceremony hashes.
    pub eth: EthereumTxHashes,
}

/// Lifecycle timestamps, epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositDates {
    /// When the record was created.
    pub created_at: u64,
    /// When the initialize transaction was confirmed.
    pub initialization_at: Option<u64>,
    /// When the finalize transaction was confirmed.
    pub finalization_at: Option<u64>,
    /// Last time any path touched this record. Non-decreasing.
    pub last_activity_at: u64,
}

/// A single deposit record, persisted as `<id>.json` in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    /// The derived deposit key, decimal-stringified.
    #[serde(with = "u256_dec")]
    pub id: DepositId,
    /// 32-byte Bitcoin funding transaction hash, hex.
    pub funding_tx_hash: String,
    /// Index of the deposit output in the funding transaction.
    pub output_index: u32,
    /// Opaque receipt fields from the intent event.
    pub receipt: DepositReceipt,
    /// The payload for the L1 `initializeDeposit` call.
    pub l1_output_event: L1OutputEvent,
    /// The L2 deposit owner, hex.
    pub owner: String,
    /// Lifecycle status.
    pub status: DepositStatus,
    /// L1 transaction hashes, when sent by this relayer.
    #[serde(default)]
    pub hashes: TxHashes,
    /// Lifecycle timestamps.
    pub dates: DepositDates,
    /// Human-readable reason of the last failed attempt.
    pub error: Option<String>,
}

impl Deposit {
    /// Builds a fresh `QUEUED` record out of a decoded deposit intent.
    ///
    /// Fails with [`Error::InvalidFundingHash`] when the funding
    /// transaction does not hash to 32 bytes, which cannot happen for
    /// intents decoded from chain events.
    pub fn from_intent(intent: &DepositIntent, now: u64) -> Result<Self> {
        let funding_tx_hash = funding_tx_hash(&intent.funding_tx);
        let id =
            get_deposit_id(&funding_tx_hash, intent.reveal.funding_output_index)?;
        Ok(Self {
            id,
            funding_tx_hash,
            output_index: intent.reveal.funding_output_index,
            receipt: DepositReceipt {
                depositor: format!("0x{}", hex::encode(&intent.l2_sender)),
                blinding_factor: intent.reveal.blinding_factor.clone(),
                wallet_public_key_hash: intent
                    .reveal
                    .wallet_public_key_hash
                    .clone(),
                refund_public_key_hash: intent
                    .reveal
                    .refund_public_key_hash
                    .clone(),
                refund_locktime: intent.reveal.refund_locktime.clone(),
                extra_data: intent.reveal.extra_data.clone(),
            },
            l1_output_event: L1OutputEvent {
                funding_tx: intent.funding_tx.clone(),
                reveal: intent.reveal.clone(),
                l2_deposit_owner: intent.l2_deposit_owner.clone(),
                l2_sender: intent.l2_sender.clone(),
            },
            owner: format!("0x{}", hex::encode(&intent.l2_deposit_owner)),
            status: DepositStatus::Queued,
            hashes: TxHashes::default(),
            dates: DepositDates {
                created_at: now,
                initialization_at: None,
                finalization_at: None,
                last_activity_at: now,
            },
            error: None,
        })
    }

    /// Bumps `lastActivityAt`. Never moves it backwards.
    pub fn touch(&mut self, now: u64) {
        self.dates.last_activity_at = self.dates.last_activity_at.max(now);
    }

    /// Records the reason of a failed attempt. Status is unchanged.
    pub fn record_failure(&mut self, reason: impl Into<String>, now: u64) {
        self.error = Some(reason.into());
        self.touch(now);
    }

    /// Advances to `INITIALIZED`. A `None` hash records the remote fact
    /// that another relayer won the initialize race. No-op when the
    /// record is already at or past `INITIALIZED`.
    pub fn mark_initialized(&mut self, tx_hash: Option<TxHash>, now: u64) {
        if self.status >= DepositStatus::Initialized {
            self.touch(now);
            return;
        }
        self.status = DepositStatus::Initialized;
        if tx_hash.is_some() {
            self.hashes.eth.initialize_tx_hash = tx_hash;
        }
        self.dates.initialization_at = Some(now);
        self.error = None;
        self.touch(now);
    }

    /// Advances to `FINALIZED`. Terminal; no-op when already there.
    pub fn mark_finalized(&mut self, tx_hash: Option<TxHash>, now: u64) {
        if self.status >= DepositStatus::Finalized {
            self.touch(now);
            return;
        }
        self.status = DepositStatus::Finalized;
        if tx_hash.is_some() {
            self.hashes.eth.finalize_tx_hash = tx_hash;
        }
        self.dates.finalization_at = Some(now);
        self.error = None;
        self.touch(now);
    }

    /// Whether the activity throttle allows a reconcile touch right now.
    pub fn eligible_for_retry(&self, now: u64) -> bool {
        now.saturating_sub(self.dates.last_activity_at)
            > TIME_TO_RETRY.as_millis() as u64
    }
}

/// Derives the deposit key the L1 depositor contract uses:
/// `uint256(keccak256(fundingTxHash || uint32_be(outputIndex)))`.
///
/// The funding hash must be exactly 64 hex characters, with or without a
/// `0x` prefix.
pub fn get_deposit_id(
    funding_tx_hash: &str,
    output_index: u32,
) -> Result<DepositId> {
    let digits = funding_tx_hash
        .strip_prefix("0x")
        .unwrap_or(funding_tx_hash);
    if digits.len() != 64 {
        return Err(Error::InvalidFundingHash);
    }
    let hash_bytes =
        hex::decode(digits).map_err(|_| Error::InvalidFundingHash)?;
    let mut preimage = [0u8; 36];
    preimage[..32].copy_from_slice(&hash_bytes);
    preimage[32..].copy_from_slice(&output_index.to_be_bytes());
    Ok(U256::from_big_endian(&keccak256(preimage)))
}

/// Hashes a raw funding transaction into its Bitcoin txid: double
/// SHA-256 over `version || inputVector || outputVector || locktime`,
/// displayed byte-reversed, `0x`-prefixed.
pub fn funding_tx_hash(tx: &FundingTransaction) -> String {
    let mut raw = Vec::with_capacity(
        tx.version.len()
            + tx.input_vector.len()
            + tx.output_vector.len()
            + tx.locktime.len(),
    );
    raw.extend_from_slice(&tx.version);
    raw.extend_from_slice(&tx.input_vector);
    raw.extend_from_slice(&tx.output_vector);
    raw.extend_from_slice(&tx.locktime);
    let mut txid: [u8; 32] =
        Sha256::digest(Sha256::digest(&raw)).into();
    txid.reverse();
    format!("0x{}", hex::encode(txid))
}

/// Serde helper for decimal-stringified U256 ids.
mod u256_dec {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &U256,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent() -> DepositIntent {
        DepositIntent {
            funding_tx: FundingTransaction {
                version: Bytes::from(vec![0x01, 0x00, 0x00, 0x00]),
                input_vector: Bytes::from(vec![0xde, 0xad]),
                output_vector: Bytes::from(vec![0xbe, 0xef]),
                locktime: Bytes::from(vec![0x00, 0x00, 0x00, 0x00]),
            },
            reveal: Reveal {
                funding_output_index: 0,
                blinding_factor: Bytes::from(vec![0xf9; 8]),
                wallet_public_key_hash: Bytes::from(vec![0x8d; 20]),
                refund_public_key_hash: Bytes::from(vec![0x28; 20]),
                refund_locktime: Bytes::from(vec![0x60, 0xbc, 0xea, 0x61]),
                extra_data: Bytes::from(vec![0x00; 32]),
            },
            l2_deposit_owner: Bytes::from(vec![0xaa; 20]),
            l2_sender: Bytes::from(vec![0xbb; 20]),
        }
    }

    #[test]
    fn deposit_id_matches_known_vectors() {
        let id = get_deposit_id(&"11".repeat(32), 0).unwrap();
        assert_eq!(
            id.to_string(),
            "49300063658499481110159567699740842733634833173704469971040164626434185312176"
        );
        let id = get_deposit_id(&"11".repeat(32), 1).unwrap();
        assert_eq!(
            id.to_string(),
            "108351045005496176395271197031963421324162696792939832802902787995337957275869"
        );
        let id = get_deposit_id(&"22".repeat(32), 7).unwrap();
        assert_eq!(
            id.to_string(),
            "101903424422706140658054144056786657835300233320107440629355681013471186911633"
        );
        let id = get_deposit_id(
            "e1f6b2c4d5a3980716253448596a7b8c9dae0f1122334455667788990abbccdd",
            3,
        )
        .unwrap();
        assert_eq!(
            id.to_string(),
            "46677081888641005041080182938616081763512979757977283054360719628111033441889"
        );
    }

    #[test]
    fn deposit_id_accepts_prefixed_hash_and_is_deterministic() {
        let bare = get_deposit_id(&"ab".repeat(32), 42).unwrap();
        let prefixed =
            get_deposit_id(&format!("0x{}", "ab".repeat(32)), 42).unwrap();
        assert_eq!(bare, prefixed);
    }

    #[test]
    fn deposit_id_rejects_bad_lengths() {
        assert!(matches!(
            get_deposit_id("1234", 0),
            Err(Error::InvalidFundingHash)
        ));
        assert!(matches!(
            get_deposit_id(&"11".repeat(33), 0),
            Err(Error::InvalidFundingHash)
        ));
        assert!(matches!(
            get_deposit_id(&"zz".repeat(32), 0),
            Err(Error::InvalidFundingHash)
        ));
    }

    #[test]
    fn funding_tx_hash_is_reversed_double_sha256() {
        let intent = sample_intent();
        assert_eq!(
            funding_tx_hash(&intent.funding_tx),
            "0xe995fb7469e558f49a91816bda34b13be6500a83828332ffd698dd5b14d343fe"
        );
    }

    #[test]
    fn from_intent_builds_a_queued_record() {
        let intent = sample_intent();
        let deposit = Deposit::from_intent(&intent, 1_000).unwrap();
        assert_eq!(deposit.status, DepositStatus::Queued);
        assert_eq!(deposit.output_index, 0);
        assert_eq!(deposit.owner, format!("0x{}", "aa".repeat(20)));
        assert_eq!(deposit.receipt.depositor, format!("0x{}", "bb".repeat(20)));
        assert_eq!(deposit.dates.created_at, 1_000);
        assert_eq!(deposit.dates.last_activity_at, 1_000);
        assert!(deposit.hashes.eth.initialize_tx_hash.is_none());
        assert!(deposit.error.is_none());
        // Same intent, same id.
        let again = Deposit::from_intent(&intent, 2_000).unwrap();
        assert_eq!(deposit.id, again.id);
    }

    #[test]
    fn status_only_moves_forward() {
        let intent = sample_intent();
        let mut deposit = Deposit::from_intent(&intent, 0).unwrap();
        deposit.mark_finalized(Some(TxHash::from_low_u64_be(7)), 10);
        assert_eq!(deposit.status, DepositStatus::Finalized);
        // A late initialize outcome must not regress the record.
        deposit.mark_initialized(Some(TxHash::from_low_u64_be(9)), 20);
        assert_eq!(deposit.status, DepositStatus::Finalized);
        assert!(deposit.hashes.eth.initialize_tx_hash.is_none());
        assert_eq!(deposit.dates.last_activity_at, 20);
    }

    #[test]
    fn transitions_stamp_hashes_and_dates() {
        let intent = sample_intent();
        let mut deposit = Deposit::from_intent(&intent, 0).unwrap();
        deposit.mark_initialized(Some(TxHash::from_low_u64_be(1)), 5);
        assert_eq!(deposit.status, DepositStatus::Initialized);
        assert_eq!(deposit.dates.initialization_at, Some(5));
        assert!(deposit.hashes.eth.initialize_tx_hash.is_some());
        deposit.mark_finalized(Some(TxHash::from_low_u64_be(2)), 9);
        assert_eq!(deposit.status, DepositStatus::Finalized);
        assert_eq!(deposit.dates.finalization_at, Some(9));
        assert!(deposit.hashes.eth.finalize_tx_hash.is_some());
        assert!(deposit.dates.initialization_at < deposit.dates.finalization_at);
    }

    #[test]
    fn remote_facts_advance_without_a_tx_hash() {
        let intent = sample_intent();
        let mut deposit = Deposit::from_intent(&intent, 0).unwrap();
        deposit.record_failure("bad reveal", 1);
        assert_eq!(deposit.error.as_deref(), Some("bad reveal"));
        deposit.mark_initialized(None, 2);
        assert_eq!(deposit.status, DepositStatus::Initialized);
        assert!(deposit.hashes.eth.initialize_tx_hash.is_none());
        assert!(deposit.error.is_none());
    }

    #[test]
    fn last_activity_never_decreases() {
        let intent = sample_intent();
        let mut deposit = Deposit::from_intent(&intent, 100).unwrap();
        deposit.touch(50);
        assert_eq!(deposit.dates.last_activity_at, 100);
        deposit.record_failure("rpc timeout", 40);
        assert_eq!(deposit.dates.last_activity_at, 100);
        deposit.touch(200);
        assert_eq!(deposit.dates.last_activity_at, 200);
    }

    #[test]
    fn retry_throttle_is_a_strict_five_minute_window() {
        let intent = sample_intent();
        let mut deposit = Deposit::from_intent(&intent, 0).unwrap();
        deposit.touch(1_000_000);
        let window = TIME_TO_RETRY.as_millis() as u64;
        assert!(!deposit.eligible_for_retry(1_000_000));
        assert!(!deposit.eligible_for_retry(1_000_000 + window));
        assert!(deposit.eligible_for_retry(1_000_000 + window + 1));
    }

    #[test]
    fn record_serializes_with_decimal_id_and_numeric_status() {
        let intent = sample_intent();
        let mut deposit = Deposit::from_intent(&intent, 42).unwrap();
        deposit.mark_initialized(Some(TxHash::from_low_u64_be(3)), 77);
        let json = serde_json::to_value(&deposit).unwrap();
        assert_eq!(json["status"], 1);
        assert_eq!(json["id"].as_str().unwrap(), deposit.id.to_string());
        assert_eq!(json["dates"]["createdAt"], 42);
        assert!(json["hashes"]["eth"]["initializeTxHash"].is_string());
        let back: Deposit = serde_json::from_value(json).unwrap();
        assert_eq!(back, deposit);
    }

    #[test]
    fn unknown_numeric_status_is_rejected() {
        assert!(DepositStatus::try_from(3).is_err());
        assert_eq!(DepositStatus::try_from(2), Ok(DepositStatus::Finalized));
    }
}
