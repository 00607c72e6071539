// std
use std::sync::Arc;
// crates
use ark_bls12_381::Fr;
use qda_core::{BlobCommitments, EncodingParams, Frame};
use qda_kzg::{
    chunk_evaluations, commit_length, commit_polynomial, prove_length, symbols_from_bytes,
    ChunkDomain, KzgError, Srs,
};
use thiserror::Error;
use tracing::trace;
// internal
use crate::backend::ChunkProofBackend;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Blob data is not valid padded symbols: {0}")]
    InvalidBlob(KzgError),
    #[error("Blob of {symbols} symbols does not fit {num_chunks} chunks of {chunk_length}")]
    InvalidParams {
        symbols: usize,
        num_chunks: u32,
        chunk_length: u32,
    },
    #[error("Proof backend returned {actual} proofs for {expected} chunks")]
    ProofCount { expected: usize, actual: usize },
    #[error("Proof backend failure: {0}")]
    Backend(#[from] KzgError),
}

impl EncodingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::ProofCount { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBlob {
    pub params: EncodingParams,
    pub frames: Vec<Frame>,
}

/// Turns padded blob bytes into commitments and proven chunks.
///
/// Each 32-byte symbol is a coefficient of the blob polynomial. The polynomial is evaluated
/// over `num_chunks * chunk_length` points split in cosets, one coset per chunk, and the proofs
/// of all chunks come out of a single [`ChunkProofBackend`] run.
#[derive(Clone)]
pub struct ErasureCoder {
    srs: Arc<Srs>,
    backend: Arc<dyn ChunkProofBackend>,
}

impl ErasureCoder {
    pub fn new(srs: Arc<Srs>, backend: Arc<dyn ChunkProofBackend>) -> Self {
        Self { srs, backend }
    }

    pub fn srs(&self) -> &Arc<Srs> {
        &self.srs
    }

    fn coefficients(data: &[u8]) -> Result<Vec<Fr>, EncodingError> {
        let coefficients = symbols_from_bytes(data).map_err(EncodingError::InvalidBlob)?;
        if coefficients.is_empty() {
            return Err(EncodingError::InvalidBlob(KzgError::InvalidLength(0)));
        }
        Ok(coefficients)
    }

    /// Commitments carried by the header of a blob with content `data`. The committed length is
    /// the symbol count rounded up to a power of two.
    pub fn commit(&self, data: &[u8]) -> Result<BlobCommitments, EncodingError> {
        let coefficients = Self::coefficients(data)?;
        let length = coefficients.len().next_power_of_two();
        Ok(BlobCommitments {
            commitment: commit_polynomial(&coefficients, &self.srs)?,
            length_commitment: commit_length(&coefficients, &self.srs)?,
            length_proof: prove_length(&coefficients, length, &self.srs)?,
            length: length as u32,
        })
    }

    pub fn encode(&self, data: &[u8], params: EncodingParams) -> Result<EncodedBlob, EncodingError> {
        let coefficients = Self::coefficients(data)?;
        let invalid_params = || EncodingError::InvalidParams {
            symbols: coefficients.len(),
            num_chunks: params.num_chunks,
            chunk_length: params.chunk_length,
        };
        if coefficients.len() > params.num_evaluations() {
            return Err(invalid_params());
        }
        let domain = ChunkDomain::new(params.num_chunks as usize, params.chunk_length as usize)
            .map_err(|_| invalid_params())?;

        let evaluations = chunk_evaluations(&domain, &coefficients)?;
        let proofs = self.backend.compute_chunk_proofs(
            &coefficients,
            domain.num_chunks(),
            domain.chunk_length(),
        )?;
        if proofs.len() != evaluations.len() {
            return Err(EncodingError::ProofCount {
                expected: evaluations.len(),
                actual: proofs.len(),
            });
        }
        trace!(
            num_chunks = params.num_chunks,
            chunk_length = params.chunk_length,
            "Encoded blob of {} symbols",
            coefficients.len()
        );
        let frames = proofs
            .into_iter()
            .zip(evaluations)
            .map(|(proof, evaluations)| Frame { proof, evaluations })
            .collect();
        Ok(EncodedBlob { params, frames })
    }
}
