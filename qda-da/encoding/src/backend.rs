// std
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
// crates
use ark_bls12_381::Fr;
use qda_kzg::{
    direct_multi_reveal_proofs, fk20_multi_reveal_proofs, ChunkDomain, Proof, Srs,
    Toeplitz1Cache,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
// internal
use crate::encoder::EncodingError;

/// Computes the opening proof of every chunk of a blob in one run.
pub trait ChunkProofBackend: Send + Sync {
    fn compute_chunk_proofs(
        &self,
        coefficients: &[Fr],
        num_chunks: usize,
        chunk_length: usize,
    ) -> Result<Vec<Proof>, EncodingError>;
}

/// FK20 multi reveal proofs. Toeplitz vectors are cached per chunk layout.
pub struct Fk20Backend {
    srs: Arc<Srs>,
    caches: RwLock<HashMap<(usize, usize), Arc<Toeplitz1Cache>>>,
}

impl Fk20Backend {
    pub fn new(srs: Arc<Srs>) -> Self {
        Self {
            srs,
            caches: RwLock::new(HashMap::new()),
        }
    }

    fn cache(&self, domain: &ChunkDomain) -> Result<Arc<Toeplitz1Cache>, EncodingError> {
        let layout = (domain.num_chunks(), domain.chunk_length());
        if let Some(cache) = self
            .caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&layout)
        {
            return Ok(cache.clone());
        }
        debug!(
            num_chunks = layout.0,
            chunk_length = layout.1,
            "Building toeplitz cache"
        );
        let cache = Arc::new(Toeplitz1Cache::with_size(&self.srs, domain)?);
        self.caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(layout, cache.clone());
        Ok(cache)
    }
}

impl ChunkProofBackend for Fk20Backend {
    fn compute_chunk_proofs(
        &self,
        coefficients: &[Fr],
        num_chunks: usize,
        chunk_length: usize,
    ) -> Result<Vec<Proof>, EncodingError> {
        let domain = ChunkDomain::new(num_chunks, chunk_length)?;
        let cache = self.cache(&domain)?;
        Ok(fk20_multi_reveal_proofs(
            coefficients,
            &domain,
            &self.srs,
            Some(cache.as_ref()),
        )?)
    }
}

/// Commits to every coset quotient separately. Slow, kept for cross checking.
pub struct ReferenceBackend {
    srs: Arc<Srs>,
}

impl ReferenceBackend {
    pub fn new(srs: Arc<Srs>) -> Self {
        Self { srs }
    }
}

impl ChunkProofBackend for ReferenceBackend {
    fn compute_chunk_proofs(
        &self,
        coefficients: &[Fr],
        num_chunks: usize,
        chunk_length: usize,
    ) -> Result<Vec<Proof>, EncodingError> {
        let domain = ChunkDomain::new(num_chunks, chunk_length)?;
        Ok(direct_multi_reveal_proofs(coefficients, &domain, &self.srs)?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofBackendKind {
    #[default]
    Fk20,
    Reference,
}

impl ProofBackendKind {
    pub fn build(self, srs: Arc<Srs>) -> Arc<dyn ChunkProofBackend> {
        match self {
            Self::Fk20 => Arc::new(Fk20Backend::new(srs)),
            Self::Reference => Arc::new(ReferenceBackend::new(srs)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ChunkProofBackend, ProofBackendKind};
    use crate::testutils::TEST_SRS;
    use ark_bls12_381::Fr;
    use ark_ff::UniformRand;
    use rand::SeedableRng;

    #[test]
    fn backends_agree() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1987);
        let coefficients: Vec<Fr> = (0..16).map(|_| Fr::rand(&mut rng)).collect();
        let fk20 = ProofBackendKind::Fk20.build(TEST_SRS.clone());
        let reference = ProofBackendKind::Reference.build(TEST_SRS.clone());
        for (num_chunks, chunk_length) in [(16, 8), (32, 4), (16, 1)] {
            let fast = fk20
                .compute_chunk_proofs(&coefficients, num_chunks, chunk_length)
                .unwrap();
            // second call hits the cache
            let cached = fk20
                .compute_chunk_proofs(&coefficients, num_chunks, chunk_length)
                .unwrap();
            let slow = reference
                .compute_chunk_proofs(&coefficients, num_chunks, chunk_length)
                .unwrap();
            assert_eq!(fast.len(), num_chunks);
            assert_eq!(fast, slow);
            assert_eq!(fast, cached);
        }
    }

    #[test]
    fn invalid_layout_is_an_error() {
        let backend = ProofBackendKind::Fk20.build(TEST_SRS.clone());
        assert!(backend
            .compute_chunk_proofs(&[Fr::from(1u64)], 3, 4)
            .is_err());
    }
}
