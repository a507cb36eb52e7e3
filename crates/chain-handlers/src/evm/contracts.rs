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

//! Typed bindings for the three contracts the relayer talks to, plus
//! the conversions between the opaque record fields and the ABI types.

use ethers::types::Bytes;
use tbtc_relayer_types::{DepositIntent, FundingTransaction, Reveal};
use tbtc_relayer_utils::{Error, Result};

mod l1 {
    use ethers::contract::abigen;

    abigen!(
        L1BitcoinDepositor,
        r#"[
            struct BitcoinTxInfo { bytes4 version; bytes inputVector; bytes outputVector; bytes4 locktime; }
            struct DepositRevealInfo { uint32 fundingOutputIndex; bytes8 blindingFactor; bytes20 walletPubKeyHash; bytes20 refundPubKeyHash; bytes4 refundLocktime; bytes32 extraData; }
            function initializeDeposit(BitcoinTxInfo fundingTx, DepositRevealInfo reveal, bytes32 l2DepositOwner)
            function finalizeDeposit(uint256 depositKey) payable returns (uint256)
            function quoteFinalizeDeposit() view returns (uint256)
            function deposits(uint256 depositKey) view returns (uint256)
        ]"#
    );
}

mod l2 {
    use ethers::contract::abigen;

    abigen!(
        L2BitcoinDepositor,
        r#"[
            struct BitcoinTxInfo { bytes4 version; bytes inputVector; bytes outputVector; bytes4 locktime; }
            struct DepositRevealInfo { uint32 fundingOutputIndex; bytes8 blindingFactor; bytes20 walletPubKeyHash; bytes20 refundPubKeyHash; bytes4 refundLocktime; bytes32 extraData; }
            event DepositInitialized(BitcoinTxInfo fundingTx, DepositRevealInfo reveal, address indexed l2DepositOwner, address indexed l2Sender)
        ]"#
    );
}

mod vault {
    use ethers::contract::abigen;

    abigen!(
        TBTCVault,
        r#"[
            event OptimisticMintingFinalized(address indexed minter, uint256 indexed depositKey, address depositor, uint256 optimisticMintingDebt)
        ]"#
    );
}

pub use l1::{BitcoinTxInfo, DepositRevealInfo, L1BitcoinDepositor};
pub use l2::{DepositInitializedFilter, L2BitcoinDepositor};
pub use vault::{OptimisticMintingFinalizedFilter, TBTCVault};

/// Encodes the record's opaque funding transaction for the L1 call.
pub fn encode_funding_tx(tx: &FundingTransaction) -> Result<BitcoinTxInfo> {
    Ok(BitcoinTxInfo {
        version: fixed(&tx.version, "fundingTx.version")?,
        input_vector: tx.input_vector.clone(),
        output_vector: tx.output_vector.clone(),
        locktime: fixed(&tx.locktime, "fundingTx.locktime")?,
    })
}

/// Encodes the record's opaque reveal tuple for the L1 call.
pub fn encode_reveal(reveal: &Reveal) -> Result<DepositRevealInfo> {
    Ok(DepositRevealInfo {
        funding_output_index: reveal.funding_output_index,
        blinding_factor: fixed(&reveal.blinding_factor, "reveal.blindingFactor")?,
        wallet_pub_key_hash: fixed(
            &reveal.wallet_public_key_hash,
            "reveal.walletPubKeyHash",
        )?,
        refund_pub_key_hash: fixed(
            &reveal.refund_public_key_hash,
            "reveal.refundPubKeyHash",
        )?,
        refund_locktime: fixed(&reveal.refund_locktime, "reveal.refundLocktime")?,
        extra_data: fixed(&reveal.extra_data, "reveal.extraData")?,
    })
}

/// Left-pads the deposit owner into the `bytes32` the L1 depositor
/// expects; non-EVM owners are already 32 bytes, EVM addresses pad.
pub fn owner_to_bytes32(owner: &Bytes) -> Result<[u8; 32]> {
    if owner.len() > 32 {
        return Err(Error::MalformedDeposit(format!(
            "l2DepositOwner: expected at most 32 bytes, got {}",
            owner.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - owner.len()..].copy_from_slice(owner);
    Ok(out)
}

fn fixed<const N: usize>(bytes: &Bytes, field: &str) -> Result<[u8; N]> {
    bytes.as_ref().try_into().map_err(|_| {
        Error::MalformedDeposit(format!(
            "{field}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

impl From<DepositInitializedFilter> for DepositIntent {
    fn from(event: DepositInitializedFilter) -> Self {
        DepositIntent {
            funding_tx: FundingTransaction {
                version: Bytes::from(event.funding_tx.0.to_vec()),
                input_vector: event.funding_tx.1,
                output_vector: event.funding_tx.2,
                locktime: Bytes::from(event.funding_tx.3.to_vec()),
            },
            reveal: Reveal {
                funding_output_index: event.reveal.0,
                blinding_factor: Bytes::from(
                    event.reveal.1.to_vec(),
                ),
                wallet_public_key_hash: Bytes::from(
                    event.reveal.2.to_vec(),
                ),
                refund_public_key_hash: Bytes::from(
                    event.reveal.3.to_vec(),
                ),
                refund_locktime: Bytes::from(
                    event.reveal.4.to_vec(),
                ),
                extra_data: Bytes::from(event.reveal.5.to_vec()),
            },
            l2_deposit_owner: Bytes::from(
                event.l_2_deposit_owner.as_bytes().to_vec(),
            ),
            l2_sender: Bytes::from(event.l_2_sender.as_bytes().to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_padding_is_left_aligned_to_the_right() {
        let owner = Bytes::from(vec![0xab; 20]);
        let padded = owner_to_bytes32(&owner).unwrap();
        assert_eq!(&padded[..12], &[0u8; 12]);
        assert_eq!(&padded[12..], &[0xab; 20]);
        let full = Bytes::from(vec![0x01; 32]);
        assert_eq!(owner_to_bytes32(&full).unwrap(), [0x01; 32]);
        let too_long = Bytes::from(vec![0x01; 33]);
        assert!(owner_to_bytes32(&too_long).is_err());
    }

    #[test]
    fn malformed_fixed_width_fields_are_rejected() {
        let tx = FundingTransaction {
            version: Bytes::from(vec![0x01; 3]),
            input_vector: Bytes::from(vec![0x00]),
            output_vector: Bytes::from(vec![0x00]),
            locktime: Bytes::from(vec![0x00; 4]),
        };
        assert!(matches!(
            encode_funding_tx(&tx),
            Err(Error::MalformedDeposit(_))
        ));
    }
}
