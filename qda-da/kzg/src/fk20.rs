// std
use std::borrow::Cow;
use std::ops::Mul;
// crates
use ark_bls12_381::{Fr, G1Affine, G1Projective};
use ark_ec::CurveGroup;
use ark_ff::Zero;
use ark_poly::EvaluationDomain;
#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};
// internal
use crate::common::KzgError;
use crate::coset::ChunkDomain;
use crate::srs::Srs;
use crate::{PolynomialEvaluationDomain, Proof};

fn circulant_domain(num_chunks: usize) -> Result<PolynomialEvaluationDomain, KzgError> {
    PolynomialEvaluationDomain::new(num_chunks * 2).ok_or(KzgError::InvalidDomain(num_chunks * 2))
}

/// FFT of the reversed column `[tau^(offset + (m-1-j) * l)]` extended with `m` zeros.
fn toeplitz1(column: &[G1Affine], domain: &PolynomialEvaluationDomain) -> Vec<G1Projective> {
    let vector_extended: Vec<G1Projective> = column
        .iter()
        .rev()
        .copied()
        .map(G1Projective::from)
        .chain(std::iter::repeat_with(G1Projective::zero).take(column.len()))
        .collect();
    domain.fft(&vector_extended)
}

fn toeplitz2(
    coefficients: &[Fr],
    extended_vector: &[G1Projective],
    domain: &PolynomialEvaluationDomain,
) -> Vec<G1Projective> {
    let toeplitz_coefficients_fft = domain.fft(coefficients);
    extended_vector
        .iter()
        .zip(toeplitz_coefficients_fft)
        .map(|(v, c)| (*v).mul(c))
        .collect()
}

fn toeplitz3(
    mut h_extended_fft: Vec<G1Projective>,
    domain: &PolynomialEvaluationDomain,
) -> Vec<G1Projective> {
    domain.ifft_in_place(&mut h_extended_fft);
    h_extended_fft
}

fn srs_column(srs: &Srs, offset: usize, num_chunks: usize, chunk_length: usize) -> Vec<G1Affine> {
    (0..num_chunks)
        .map(|u| srs.powers_of_g1[offset + u * chunk_length])
        .collect()
}

/// Precomputed `toeplitz1` vectors for one `(num_chunks, chunk_length)` layout, one per offset
/// inside a chunk. They depend only on the reference string and can be reused across blobs.
#[derive(Clone)]
pub struct Toeplitz1Cache {
    num_chunks: usize,
    chunk_length: usize,
    columns: Vec<Vec<G1Projective>>,
}

impl Toeplitz1Cache {
    pub fn with_size(srs: &Srs, domain: &ChunkDomain) -> Result<Self, KzgError> {
        let num_chunks = domain.num_chunks();
        let chunk_length = domain.chunk_length();
        srs.g1_powers(domain.size())?;
        let circulant = circulant_domain(num_chunks)?;
        let build = |offset: usize| {
            toeplitz1(
                &srs_column(srs, offset, num_chunks, chunk_length),
                &circulant,
            )
        };
        let columns = {
            #[cfg(feature = "parallel")]
            {
                (0..chunk_length).into_par_iter()
            }
            #[cfg(not(feature = "parallel"))]
            {
                0..chunk_length
            }
        }
        .map(build)
        .collect();
        Ok(Self {
            num_chunks,
            chunk_length,
            columns,
        })
    }

    pub fn matches(&self, domain: &ChunkDomain) -> bool {
        self.num_chunks == domain.num_chunks() && self.chunk_length == domain.chunk_length()
    }
}

/// Compute the opening proof of every chunk of `domain` at once.
///
/// The proof for chunk `k` is `sum_d z_k^d H_d` with `z_k = h_k^l`, which is a size `m` FFT of
/// the vector `H`. Each `H_d = sum_a sum_u f[a + (u + d + 1) l] [tau^(a + u l)]` is a Toeplitz
/// product per offset `a`, computed as a circulant product of size `2m`. The products for all
/// offsets are accumulated in the frequency domain so a single inverse FFT is needed.
pub fn fk20_multi_reveal_proofs(
    coefficients: &[Fr],
    domain: &ChunkDomain,
    srs: &Srs,
    toeplitz1_cache: Option<&Toeplitz1Cache>,
) -> Result<Vec<Proof>, KzgError> {
    let num_chunks = domain.num_chunks();
    let chunk_length = domain.chunk_length();
    if coefficients.len() > domain.size() {
        return Err(KzgError::InvalidChunkLayout {
            num_chunks,
            chunk_length,
            coefficients: coefficients.len(),
        });
    }
    let cache = match toeplitz1_cache {
        Some(cache) if cache.matches(domain) => Cow::Borrowed(cache),
        Some(_) => {
            return Err(KzgError::InvalidChunkLayout {
                num_chunks,
                chunk_length,
                coefficients: coefficients.len(),
            })
        }
        None => Cow::Owned(Toeplitz1Cache::with_size(srs, domain)?),
    };
    let circulant = circulant_domain(num_chunks)?;
    let coefficient = |i: usize| coefficients.get(i).copied().unwrap_or_else(Fr::zero);

    let h_extended_fft = cache
        .columns
        .iter()
        .enumerate()
        .map(|(offset, column)| {
            let toeplitz_coefficients: Vec<Fr> = (0..num_chunks)
                .map(|e| coefficient(offset + e * chunk_length))
                .chain(std::iter::repeat(Fr::zero()).take(num_chunks))
                .collect();
            toeplitz2(&toeplitz_coefficients, column, &circulant)
        })
        .reduce(|mut acc, products| {
            acc.iter_mut().zip(products).for_each(|(a, p)| *a += p);
            acc
        })
        .unwrap_or_else(|| vec![G1Projective::zero(); num_chunks * 2]);
    let h_vector: Vec<G1Projective> = toeplitz3(h_extended_fft, &circulant)
        .into_iter()
        .skip(num_chunks)
        .collect();

    let proofs_domain =
        PolynomialEvaluationDomain::new(num_chunks).ok_or(KzgError::InvalidDomain(num_chunks))?;
    let proofs = proofs_domain.fft(&h_vector);
    Ok(G1Projective::normalize_batch(&proofs)
        .into_iter()
        .map(|w| Proof { w, random_v: None })
        .collect())
}

#[cfg(test)]
mod test {
    use super::{fk20_multi_reveal_proofs, Toeplitz1Cache};
    use crate::coset::ChunkDomain;
    use crate::kzg::direct_multi_reveal_proofs;
    use crate::srs::{srs_from_randomness, Srs};
    use ark_bls12_381::Fr;
    use ark_ff::UniformRand;
    use once_cell::sync::Lazy;
    use rand::SeedableRng;

    static SRS: Lazy<Srs> = Lazy::new(|| {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1987);
        srs_from_randomness(64, 16, &mut rng)
    });

    #[test]
    fn fk20_matches_direct_proofs() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for (num_chunks, chunk_length, len) in
            [(8, 4, 32), (8, 4, 9), (4, 1, 4), (1, 8, 8), (16, 2, 20), (2, 16, 32)]
        {
            let coefficients: Vec<Fr> = (0..len).map(|_| Fr::rand(&mut rng)).collect();
            let domain = ChunkDomain::new(num_chunks, chunk_length).unwrap();
            let direct = direct_multi_reveal_proofs(&coefficients, &domain, &SRS).unwrap();
            let fk20 = fk20_multi_reveal_proofs(&coefficients, &domain, &SRS, None).unwrap();
            assert_eq!(direct, fk20, "Proofs without caching did not match");

            let cache = Toeplitz1Cache::with_size(&SRS, &domain).unwrap();
            let cached =
                fk20_multi_reveal_proofs(&coefficients, &domain, &SRS, Some(&cache)).unwrap();
            assert_eq!(direct, cached, "Proofs with caching did not match");
        }
    }

    #[test]
    fn cache_for_other_layout_is_rejected() {
        let cache = Toeplitz1Cache::with_size(&SRS, &ChunkDomain::new(4, 4).unwrap()).unwrap();
        let domain = ChunkDomain::new(8, 2).unwrap();
        assert!(fk20_multi_reveal_proofs(&[Fr::from(1u64)], &domain, &SRS, Some(&cache)).is_err());
    }

    #[test]
    fn srs_too_small() {
        let domain = ChunkDomain::new(32, 4).unwrap();
        assert!(Toeplitz1Cache::with_size(&SRS, &domain).is_err());
    }
}
