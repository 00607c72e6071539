// std
use std::fmt::{Debug, Display, Formatter};
// crates
use qda_kzg::common::{commitment_to_bytes, g2_to_bytes};
use qda_kzg::{Commitment, LengthCommitment, LengthProof};
use serde::{Deserialize, Serialize};
// internal
use crate::keccak256;

pub type BlobVersion = u16;
pub type QuorumId = u8;
pub type RelayKey = u32;
pub type AccountId = [u8; 20];

/// Keccak-256 hash of a [`BlobHeader`], the primary key of a blob everywhere in the system.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlobKey(
    #[serde(
        serialize_with = "qda_utils::serde::serialize_bytes_array",
        deserialize_with = "qda_utils::serde::deserialize_bytes_array"
    )]
    pub [u8; 32],
);

impl BlobKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        const_hex::encode(self.0)
    }
}

impl From<[u8; 32]> for BlobKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Display for BlobKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for BlobKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobKey({})", self.to_hex())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(
        serialize_with = "qda_utils::serde::serialize_bytes_array",
        deserialize_with = "qda_utils::serde::deserialize_bytes_array"
    )]
    pub account_id: AccountId,
    /// Nanoseconds since the unix epoch.
    pub timestamp: i64,
    pub cumulative_payment: u128,
}

/// Commitments binding a blob's content and its length.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCommitments {
    #[serde(
        serialize_with = "qda_utils::serde::serialize_canonical",
        deserialize_with = "qda_utils::serde::deserialize_canonical"
    )]
    pub commitment: Commitment,
    #[serde(
        serialize_with = "qda_utils::serde::serialize_canonical",
        deserialize_with = "qda_utils::serde::deserialize_canonical"
    )]
    pub length_commitment: LengthCommitment,
    #[serde(
        serialize_with = "qda_utils::serde::serialize_canonical",
        deserialize_with = "qda_utils::serde::deserialize_canonical"
    )]
    pub length_proof: LengthProof,
    /// Number of symbols of the blob polynomial.
    pub length: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub version: BlobVersion,
    pub quorum_numbers: Vec<QuorumId>,
    pub commitments: BlobCommitments,
    pub payment: PaymentMetadata,
}

impl BlobHeader {
    /// Hash over a fixed layout of every header field.
    pub fn blob_key(&self) -> BlobKey {
        let commitments = &self.commitments;
        let quorum_count = [self.quorum_numbers.len() as u8];
        BlobKey(keccak256(&[
            &self.version.to_be_bytes(),
            &quorum_count,
            &self.quorum_numbers,
            &commitment_to_bytes(&commitments.commitment),
            &g2_to_bytes(&commitments.length_commitment.0),
            &g2_to_bytes(&commitments.length_proof.0),
            &commitments.length.to_be_bytes(),
            &self.payment.account_id,
            &self.payment.timestamp.to_be_bytes(),
            &self.payment.cumulative_payment.to_be_bytes(),
        ]))
    }
}

/// A header plus the relays serving its chunks. This is what gets batched and attested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobCertificate {
    pub header: BlobHeader,
    pub relay_keys: Vec<RelayKey>,
}

impl BlobCertificate {
    pub fn blob_key(&self) -> BlobKey {
        self.header.blob_key()
    }

    /// Leaf of the batch merkle tree.
    pub fn hash(&self) -> [u8; 32] {
        let relays: Vec<u8> = self
            .relay_keys
            .iter()
            .flat_map(|key| key.to_be_bytes())
            .collect();
        keccak256(&[self.blob_key().as_bytes(), &relays])
    }
}
