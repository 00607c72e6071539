// std
// crates
use ark_bls12_381::Fr;
use ark_ff::{Field, One};
use ark_poly::EvaluationDomain;
// internal
use crate::common::KzgError;
use crate::PolynomialEvaluationDomain;

/// Layout of an extended polynomial over `num_chunks * chunk_length` evaluation points.
///
/// With `w` the generator of the full domain, chunk `k` owns the points `w^(k + t * num_chunks)`
/// for `t` in `0..chunk_length`. Those points form the coset `h_k * H` where `h_k = w^k` and `H`
/// is the subgroup of `chunk_length`-th roots of unity, so each chunk vanishes on
/// `x^chunk_length - h_k^chunk_length`.
#[derive(Clone, Copy, Debug)]
pub struct ChunkDomain {
    num_chunks: usize,
    chunk_length: usize,
    extended: PolynomialEvaluationDomain,
    chunk: PolynomialEvaluationDomain,
}

impl ChunkDomain {
    pub fn new(num_chunks: usize, chunk_length: usize) -> Result<Self, KzgError> {
        if !num_chunks.is_power_of_two() {
            return Err(KzgError::InvalidDomain(num_chunks));
        }
        if !chunk_length.is_power_of_two() {
            return Err(KzgError::InvalidDomain(chunk_length));
        }
        let size = num_chunks
            .checked_mul(chunk_length)
            .ok_or(KzgError::InvalidDomain(usize::MAX))?;
        let extended =
            PolynomialEvaluationDomain::new(size).ok_or(KzgError::InvalidDomain(size))?;
        let chunk = PolynomialEvaluationDomain::new(chunk_length)
            .ok_or(KzgError::InvalidDomain(chunk_length))?;
        Ok(Self {
            num_chunks,
            chunk_length,
            extended,
            chunk,
        })
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn chunk_length(&self) -> usize {
        self.chunk_length
    }

    pub fn size(&self) -> usize {
        self.num_chunks * self.chunk_length
    }

    /// Coset shift `h_k` of chunk `index`.
    pub fn coset_shift(&self, index: usize) -> Fr {
        self.extended.element(index)
    }

    /// `h_k^chunk_length`, the constant of the chunk vanishing polynomial.
    pub fn vanishing_constant(&self, index: usize) -> Fr {
        self.coset_shift(index).pow([self.chunk_length as u64])
    }

    /// Evaluations of the polynomial over the whole extended domain.
    pub fn extend(&self, coefficients: &[Fr]) -> Result<Vec<Fr>, KzgError> {
        if coefficients.len() > self.size() {
            return Err(KzgError::InvalidChunkLayout {
                num_chunks: self.num_chunks,
                chunk_length: self.chunk_length,
                coefficients: coefficients.len(),
            });
        }
        Ok(self.extended.fft(coefficients))
    }

    /// Coefficients of the polynomial of degree `< chunk_length` interpolating `evaluations`
    /// over the coset of chunk `index`.
    pub fn interpolate_chunk(&self, index: usize, evaluations: &[Fr]) -> Vec<Fr> {
        debug_assert_eq!(evaluations.len(), self.chunk_length);
        let shift_inverse = self
            .coset_shift(index)
            .inverse()
            .unwrap_or_else(|| panic!("Roots of unity are never zero"));
        let mut coefficients = self.chunk.ifft(evaluations);
        let mut scale = Fr::one();
        for coefficient in coefficients.iter_mut() {
            *coefficient *= scale;
            scale *= shift_inverse;
        }
        coefficients
    }
}

/// Split the extended evaluations of `coefficients` into per chunk evaluation vectors.
pub fn chunk_evaluations(
    domain: &ChunkDomain,
    coefficients: &[Fr],
) -> Result<Vec<Vec<Fr>>, KzgError> {
    let evaluations = domain.extend(coefficients)?;
    let num_chunks = domain.num_chunks();
    Ok((0..num_chunks)
        .map(|k| {
            evaluations
                .iter()
                .skip(k)
                .step_by(num_chunks)
                .copied()
                .collect()
        })
        .collect())
}
