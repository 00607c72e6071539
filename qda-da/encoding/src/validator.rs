// std
use std::collections::hash_map::Entry;
use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
// crates
use itertools::Itertools;
#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use qda_core::{
    check_operator_count, Assignment, AssignmentError, BatchHeader, BlobCertificate, BlobKey,
    BlobShard, ChunkAssigner, EncodingParameterResolver, EncodingParams, Frame, OperatorId,
    OperatorState, QuorumId, ResolverError,
};
use qda_kzg::{
    batch_verify_chunk_proofs, verify_chunk_proof, verify_commitment_equivalence,
    verify_length_proof, ChunkDomain, ChunkOpening, Srs, BYTES_PER_SYMBOL,
};
use qda_utils::{WorkerPool, WorkerPoolError};
use thiserror::Error;
use tracing::{debug, warn};
// internal

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("quorum {quorum} bundle has {actual} chunks, {expected} are assigned")]
    WrongChunkCount {
        quorum: QuorumId,
        expected: u32,
        actual: usize,
    },
    #[error("chunk {index} of quorum {quorum} is outside the assignment")]
    IndexMismatch { quorum: QuorumId, index: u32 },
    #[error("chunk {index} of quorum {quorum} is sent twice")]
    DuplicateIndex { quorum: QuorumId, index: u32 },
    #[error("chunk {0} differs between quorum bundles")]
    ConflictingChunk(u32),
    #[error("chunk {index} has {actual} symbols instead of {expected}")]
    WrongChunkLength {
        index: u32,
        expected: u32,
        actual: usize,
    },
    #[error("missing bundle for quorum {0}")]
    MissingBundle(QuorumId),
    #[error("unexpected bundle for quorum {0}")]
    UnexpectedBundle(QuorumId),
    #[error("proof of chunk {0} does not verify")]
    BadProof(u32),
    #[error("length proof does not verify")]
    InvalidLengthProof,
    #[error("G1 and G2 commitments differ")]
    InvalidCommitment,
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error("verification error: {0}")]
    Kzg(String),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Blob {key} rejected: {failure}")]
    Blob {
        key: BlobKey,
        failure: ValidationFailure,
    },
    #[error("Batch root does not match its certificates")]
    BatchRootMismatch,
    #[error(transparent)]
    Pool(#[from] WorkerPoolError),
}

impl ValidationError {
    pub fn blob_key(&self) -> Option<BlobKey> {
        match self {
            Self::Blob { key, .. } => Some(*key),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Check that `header` is the batch built from `certificates`.
pub fn validate_batch_header(
    header: &BatchHeader,
    certificates: &[BlobCertificate],
) -> Result<(), ValidationError> {
    let (expected, _) =
        BatchHeader::from_certificates(certificates, header.reference_block_number);
    if &expected != header {
        return Err(ValidationError::BatchRootMismatch);
    }
    Ok(())
}

type AssignmentCache = HashMap<(EncodingParams, QuorumId), BTreeMap<OperatorId, Assignment>>;

/// Operator side verification of received shards.
pub struct ShardValidator {
    operator: OperatorId,
    srs: Arc<Srs>,
    resolver: EncodingParameterResolver,
    assigner: ChunkAssigner,
    pool: Arc<WorkerPool>,
}

impl ShardValidator {
    pub fn new(
        operator: OperatorId,
        srs: Arc<Srs>,
        resolver: EncodingParameterResolver,
        assigner: ChunkAssigner,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            operator,
            srs,
            resolver,
            assigner,
            pool,
        }
    }

    pub fn operator(&self) -> &OperatorId {
        &self.operator
    }

    /// Validate every shard of a request. Proof verification of each blob runs on the worker
    /// pool. A blob is accepted only if all of its chunks pass, and the first rejected blob in
    /// request order is reported.
    pub async fn validate_blobs(
        &self,
        shards: Vec<BlobShard>,
        state: &OperatorState,
    ) -> Result<(), ValidationError> {
        let mut cache = AssignmentCache::new();
        let mut checked = Vec::with_capacity(shards.len());
        for shard in shards {
            let key = shard.certificate.blob_key();
            let params = self
                .check_bundles(&shard, state, &mut cache)
                .map_err(|failure| ValidationError::Blob { key, failure })?;
            checked.push((key, shard, params));
        }

        let mut handles = Vec::with_capacity(checked.len());
        for (key, shard, params) in checked {
            let srs = self.srs.clone();
            let handle = self
                .pool
                .submit_blocking(move || verify_proofs(&srs, &shard, params))
                .await?;
            handles.push((key, handle));
        }
        for (key, handle) in handles {
            handle
                .join()
                .await??
                .map_err(|failure| ValidationError::Blob { key, failure })?;
        }
        Ok(())
    }

    /// Assignment and layout checks, everything but the cryptography.
    fn check_bundles(
        &self,
        shard: &BlobShard,
        state: &OperatorState,
        cache: &mut AssignmentCache,
    ) -> Result<EncodingParams, ValidationFailure> {
        let header = &shard.certificate.header;
        let blob_length = header.commitments.length as usize * BYTES_PER_SYMBOL;
        let params = self.resolver.resolve(blob_length, header.version)?;
        let version = self.resolver.version_parameters(header.version)?;

        if let Some(quorum) = shard
            .bundles
            .keys()
            .find(|quorum| !header.quorum_numbers.contains(quorum))
        {
            return Err(ValidationFailure::UnexpectedBundle(*quorum));
        }

        for quorum in header.quorum_numbers.iter().copied().unique() {
            check_operator_count(state, quorum, version)?;
            let assignments = match cache.entry((params, quorum)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    entry.insert(self.assigner.assignments(state, &params, quorum)?)
                }
            };
            let assignment = assignments
                .get(&self.operator)
                .copied()
                .unwrap_or_default();
            let Some(bundle) = shard.bundles.get(&quorum) else {
                if assignment.num_chunks > 0 {
                    return Err(ValidationFailure::MissingBundle(quorum));
                }
                continue;
            };
            if assignment.num_chunks == 0 && !bundle.chunks.is_empty() {
                return Err(ValidationFailure::UnexpectedBundle(quorum));
            }
            if bundle.chunks.len() != assignment.num_chunks as usize {
                return Err(ValidationFailure::WrongChunkCount {
                    quorum,
                    expected: assignment.num_chunks,
                    actual: bundle.chunks.len(),
                });
            }
            let mut seen = BTreeSet::new();
            for chunk in &bundle.chunks {
                if !assignment.contains(chunk.index, params.num_chunks) {
                    return Err(ValidationFailure::IndexMismatch {
                        quorum,
                        index: chunk.index,
                    });
                }
                if !seen.insert(chunk.index) {
                    return Err(ValidationFailure::DuplicateIndex {
                        quorum,
                        index: chunk.index,
                    });
                }
                if chunk.frame.len() != params.chunk_length as usize {
                    return Err(ValidationFailure::WrongChunkLength {
                        index: chunk.index,
                        expected: params.chunk_length,
                        actual: chunk.frame.len(),
                    });
                }
            }
        }

        // proofs are checked once per index, so every copy of an index must be identical
        let mut frames: BTreeMap<u32, &Frame> = BTreeMap::new();
        for chunk in shard.bundles.values().flat_map(|bundle| &bundle.chunks) {
            match frames.entry(chunk.index) {
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(&chunk.frame);
                }
                btree_map::Entry::Occupied(entry) => {
                    if *entry.get() != &chunk.frame {
                        return Err(ValidationFailure::ConflictingChunk(chunk.index));
                    }
                }
            }
        }
        Ok(params)
    }
}

fn kzg_failure(error: qda_kzg::KzgError) -> ValidationFailure {
    ValidationFailure::Kzg(error.to_string())
}

/// Commitment, length and chunk proof checks of one blob.
fn verify_proofs(
    srs: &Srs,
    shard: &BlobShard,
    params: EncodingParams,
) -> Result<(), ValidationFailure> {
    let commitments = &shard.certificate.header.commitments;
    if !verify_commitment_equivalence(&commitments.commitment, &commitments.length_commitment, srs)
    {
        return Err(ValidationFailure::InvalidCommitment);
    }
    if !verify_length_proof(
        &commitments.length_commitment,
        &commitments.length_proof,
        commitments.length as usize,
        srs,
    ) {
        return Err(ValidationFailure::InvalidLengthProof);
    }

    let domain = ChunkDomain::new(params.num_chunks as usize, params.chunk_length as usize)
        .map_err(kzg_failure)?;
    // copies sent for several quorums are identical, see `check_bundles`
    let openings: Vec<ChunkOpening> = shard
        .bundles
        .values()
        .flat_map(|bundle| &bundle.chunks)
        .unique_by(|chunk| chunk.index)
        .map(|chunk| ChunkOpening {
            index: chunk.index as usize,
            evaluations: &chunk.frame.evaluations,
            proof: &chunk.frame.proof,
        })
        .collect();
    if batch_verify_chunk_proofs(&commitments.commitment, &openings, &domain, srs)
        .map_err(kzg_failure)?
    {
        return Ok(());
    }

    debug!("Batch verification failed, looking for the offending chunk");
    let verify = |opening: &ChunkOpening| {
        !matches!(
            verify_chunk_proof(&commitments.commitment, *opening, &domain, srs),
            Ok(true)
        )
    };
    let failed = {
        #[cfg(feature = "parallel")]
        {
            openings.par_iter().find_first(|opening| verify(opening))
        }
        #[cfg(not(feature = "parallel"))]
        {
            openings.iter().find(|opening| verify(opening))
        }
    };
    match failed {
        Some(opening) => {
            warn!("Chunk {} failed proof verification", opening.index);
            Err(ValidationFailure::BadProof(opening.index as u32))
        }
        None => Err(ValidationFailure::Kzg(
            "batch verification failed".to_string(),
        )),
    }
}
