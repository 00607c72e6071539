// std
use std::collections::BTreeMap;
// crates
use qda_kzg::common::{proof_from_bytes, proof_to_bytes};
use qda_kzg::{symbols_from_bytes, symbols_to_bytes, FieldElement, KzgError, Proof};
use qda_kzg::{BYTES_PER_SYMBOL, G1_COMPRESSED_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
// internal
use crate::blob::{BlobCertificate, QuorumId};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame of {0} bytes is malformed")]
    Malformed(usize),
    #[error(transparent)]
    Kzg(#[from] KzgError),
}

/// The evaluations of one chunk plus its opening proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(
        serialize_with = "qda_utils::serde::serialize_canonical",
        deserialize_with = "qda_utils::serde::deserialize_canonical"
    )]
    pub proof: Proof,
    #[serde(
        serialize_with = "qda_utils::serde::serialize_vec_canonical",
        deserialize_with = "qda_utils::serde::deserialize_vec_canonical"
    )]
    pub evaluations: Vec<FieldElement>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.evaluations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluations.is_empty()
    }

    /// Compressed proof followed by the big-endian evaluations.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(G1_COMPRESSED_SIZE + self.len() * BYTES_PER_SYMBOL);
        bytes.extend_from_slice(&proof_to_bytes(&self.proof));
        bytes.extend(symbols_to_bytes(&self.evaluations));
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < G1_COMPRESSED_SIZE
            || (bytes.len() - G1_COMPRESSED_SIZE) % BYTES_PER_SYMBOL != 0
        {
            return Err(FrameError::Malformed(bytes.len()));
        }
        let (proof, symbols) = bytes.split_at(G1_COMPRESSED_SIZE);
        Ok(Self {
            proof: proof_from_bytes(proof)?,
            evaluations: symbols_from_bytes(symbols)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFrame {
    pub index: u32,
    pub frame: Frame,
}

/// Chunks of one blob sent to one operator for one quorum.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub chunks: Vec<IndexedFrame>,
}

impl Bundle {
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.chunks.iter().map(|chunk| chunk.index)
    }
}

/// Everything an operator receives for one blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobShard {
    pub certificate: BlobCertificate,
    pub bundles: BTreeMap<QuorumId, Bundle>,
}
