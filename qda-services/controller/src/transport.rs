// std
use std::time::Duration;
// crates
use async_trait::async_trait;
use blst::min_sig::Signature;
use qda_core::{keccak256, BatchHeader, BlobShard, OperatorId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
// internal

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Operator unreachable: {0}")]
    Unreachable(String),
    /// The operator received the request and refused to sign it.
    #[error("Operator rejected the request: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable(_))
    }
}

/// Chunks of one batch sent to a single operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChunksRequest {
    pub batch_header: BatchHeader,
    /// Only the bundles assigned to the receiving operator.
    pub shards: Vec<BlobShard>,
    pub disperser_id: u32,
    pub signature: Vec<u8>,
}

impl StoreChunksRequest {
    /// Digest signed by the disperser.
    pub fn signing_hash(batch_header: &BatchHeader, disperser_id: u32) -> [u8; 32] {
        keccak256(&[&batch_header.hash(), &disperser_id.to_be_bytes()])
    }

    pub fn hash(&self) -> [u8; 32] {
        Self::signing_hash(&self.batch_header, self.disperser_id)
    }
}

/// Delivery of chunks to operator nodes. A successful call returns the operator's signature
/// over the batch header hash, which the caller still has to verify.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send_chunks(
        &self,
        operator: &OperatorId,
        socket: &str,
        request: &StoreChunksRequest,
        timeout: Duration,
    ) -> Result<Signature, TransportError>;
}
