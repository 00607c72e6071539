// std
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
// crates
use serde::{Deserialize, Serialize};
// internal
use crate::attestation::Attestation;
use crate::batch::BlobInclusionInfo;
use crate::blob::{BlobHeader, BlobKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlobStatus {
    Queued,
    Encoded,
    GatheringSignatures,
    Complete,
    Failed,
}

impl BlobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether a blob may move from `self` to `next`. `Queued -> Queued` is a retry.
    pub fn can_transition_to(&self, next: BlobStatus) -> bool {
        use BlobStatus::*;
        matches!(
            (self, next),
            (Queued, Queued | Encoded | Failed)
                | (Encoded, GatheringSignatures | Failed)
                | (GatheringSignatures, Complete | Failed)
        )
    }
}

impl Display for BlobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Queued => "queued",
            Self::Encoded => "encoded",
            Self::GatheringSignatures => "gathering_signatures",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(status)
    }
}

/// Layout of the encoded chunks of a blob in chunk storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    pub total_chunk_size_bytes: u64,
    pub fragment_size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub header: BlobHeader,
    pub status: BlobStatus,
    pub num_retries: u32,
    pub blob_size: u64,
    /// Nanoseconds since the unix epoch.
    pub requested_at: u64,
    pub updated_at: u64,
    /// Seconds since the unix epoch after which the blob is dropped.
    pub expiry: u64,
    pub fragment_info: Option<FragmentInfo>,
}

impl BlobMetadata {
    pub fn new(header: BlobHeader, blob_size: u64, requested_at: u64, expiry: u64) -> Self {
        Self {
            header,
            status: BlobStatus::Queued,
            num_retries: 0,
            blob_size,
            requested_at,
            updated_at: requested_at,
            expiry,
            fragment_info: None,
        }
    }

    pub fn blob_key(&self) -> BlobKey {
        self.header.blob_key()
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expiry <= now_secs
    }
}

/// Where a blob sits in an attested batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobAttestationInfo {
    pub inclusion_info: BlobInclusionInfo,
    pub attestation: Attestation,
}

pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

pub fn now_secs() -> u64 {
    now_nanos() / 1_000_000_000
}
