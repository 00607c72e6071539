// std
use std::collections::BTreeMap;
// crates
use qda_kzg::BYTES_PER_SYMBOL;
use serde::{Deserialize, Serialize};
use thiserror::Error;
// internal
use crate::blob::BlobVersion;

/// Protocol parameters registered for one blob version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobVersionParameters {
    /// Expansion factor of the erasure code.
    pub coding_rate: u32,
    pub max_num_operators: u32,
    /// Upper bound on the number of chunks of a blob of this version.
    pub num_chunks: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingParams {
    pub num_chunks: u32,
    pub chunk_length: u32,
}

impl EncodingParams {
    pub fn num_evaluations(&self) -> usize {
        self.num_chunks as usize * self.chunk_length as usize
    }

    /// Serialized size of one chunk without its proof.
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_length as usize * BYTES_PER_SYMBOL
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("No parameters registered for blob version {0}")]
    InvalidVersion(BlobVersion),
    #[error("Blob needs {required} chunks but version {version} allows at most {max}")]
    BlobTooLarge {
        version: BlobVersion,
        required: u64,
        max: u32,
    },
    #[error("Blob is empty")]
    EmptyBlob,
    #[error("Blob length {0} is not a multiple of the symbol size")]
    UnpaddedLength(usize),
    #[error("Parameters of blob version {version} are invalid: {reason}")]
    InvalidParameters {
        version: BlobVersion,
        reason: &'static str,
    },
}

/// Maps a padded blob length and version to the chunk layout of the encoded blob.
#[derive(Clone, Debug)]
pub struct EncodingParameterResolver {
    versions: BTreeMap<BlobVersion, BlobVersionParameters>,
    max_symbols_per_chunk: u32,
}

impl EncodingParameterResolver {
    pub fn new(
        versions: BTreeMap<BlobVersion, BlobVersionParameters>,
        max_symbols_per_chunk: u32,
    ) -> Self {
        Self {
            versions,
            max_symbols_per_chunk: max_symbols_per_chunk.max(1),
        }
    }

    pub fn versions(&self) -> &BTreeMap<BlobVersion, BlobVersionParameters> {
        &self.versions
    }

    pub fn version_parameters(
        &self,
        version: BlobVersion,
    ) -> Result<&BlobVersionParameters, ResolverError> {
        let parameters = self
            .versions
            .get(&version)
            .ok_or(ResolverError::InvalidVersion(version))?;
        if parameters.coding_rate == 0 || !parameters.coding_rate.is_power_of_two() {
            return Err(ResolverError::InvalidParameters {
                version,
                reason: "coding rate must be a power of two",
            });
        }
        if parameters.num_chunks == 0 || !parameters.num_chunks.is_power_of_two() {
            return Err(ResolverError::InvalidParameters {
                version,
                reason: "chunk bound must be a power of two",
            });
        }
        Ok(parameters)
    }

    /// Resolve `(num_chunks, chunk_length)` for `blob_length` padded bytes.
    ///
    /// The blob polynomial is extended to `next_pow2(symbols) * coding_rate` evaluations. Chunks
    /// are as short as the version's chunk bound allows, and the chunk count is the next power
    /// of two covering the extended evaluations.
    pub fn resolve(
        &self,
        blob_length: usize,
        version: BlobVersion,
    ) -> Result<EncodingParams, ResolverError> {
        let parameters = self.version_parameters(version)?;
        if blob_length == 0 {
            return Err(ResolverError::EmptyBlob);
        }
        if blob_length % BYTES_PER_SYMBOL != 0 {
            return Err(ResolverError::UnpaddedLength(blob_length));
        }
        let symbols = (blob_length / BYTES_PER_SYMBOL) as u64;
        let extended = symbols.next_power_of_two() * parameters.coding_rate as u64;

        let required = extended.div_ceil(self.max_symbols_per_chunk as u64);
        if required > parameters.num_chunks as u64 {
            return Err(ResolverError::BlobTooLarge {
                version,
                required,
                max: parameters.num_chunks,
            });
        }

        let chunk_length = extended
            .div_ceil(parameters.num_chunks as u64)
            .next_power_of_two()
            .max(1);
        let num_chunks = extended.div_ceil(chunk_length).next_power_of_two();
        Ok(EncodingParams {
            num_chunks: num_chunks as u32,
            chunk_length: chunk_length as u32,
        })
    }
}
