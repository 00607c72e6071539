// std
// crates
use ark_bls12_381::{Bls12_381, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::pairing::{Pairing, PairingOutput};
use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_ff::{One, PrimeField, Zero};
use blake2::digest::{Update, VariableOutput};
#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};
// internal
use crate::common::{commitment_to_bytes, field_element_to_bytes_be, proof_to_bytes, KzgError};
use crate::coset::ChunkDomain;
use crate::srs::Srs;
use crate::{Commitment, Proof};

/// Commit to a polynomial given in coefficient form.
pub fn commit_polynomial(coefficients: &[Fr], srs: &Srs) -> Result<Commitment, KzgError> {
    g1_linear_combination(srs.g1_powers(coefficients.len())?, coefficients)
        .map(|point| ark_poly_commit::kzg10::Commitment(point.into_affine()))
}

pub(crate) fn g1_linear_combination(
    bases: &[G1Affine],
    scalars: &[Fr],
) -> Result<G1Projective, KzgError> {
    G1Projective::msm(bases, scalars).map_err(KzgError::MsmLength)
}

pub(crate) fn g2_linear_combination(
    bases: &[G2Affine],
    scalars: &[Fr],
) -> Result<G2Projective, KzgError> {
    G2Projective::msm(bases, scalars).map_err(KzgError::MsmLength)
}

/// Divide `coefficients` by `x^chunk_length - constant` returning `(quotient, remainder)`.
fn divide_by_coset_vanishing(
    coefficients: &[Fr],
    chunk_length: usize,
    constant: Fr,
) -> (Vec<Fr>, Vec<Fr>) {
    let mut remainder = coefficients.to_vec();
    if remainder.len() <= chunk_length {
        return (vec![], remainder);
    }
    let mut quotient = vec![Fr::zero(); remainder.len() - chunk_length];
    for i in (chunk_length..remainder.len()).rev() {
        let leading = remainder[i];
        quotient[i - chunk_length] = leading;
        remainder[i - chunk_length] += constant * leading;
    }
    remainder.truncate(chunk_length);
    (quotient, remainder)
}

/// Compute one opening proof per chunk by committing to each coset quotient separately.
/// Quadratic in the polynomial size, it serves as the reference the batched FK20 proofs are
/// checked against.
pub fn direct_multi_reveal_proofs(
    coefficients: &[Fr],
    domain: &ChunkDomain,
    srs: &Srs,
) -> Result<Vec<Proof>, KzgError> {
    let chunk_length = domain.chunk_length();
    let prove = |index: usize| -> Result<Proof, KzgError> {
        let constant = domain.vanishing_constant(index);
        let (quotient, _) = divide_by_coset_vanishing(coefficients, chunk_length, constant);
        let w = g1_linear_combination(srs.g1_powers(quotient.len())?, &quotient)?;
        Ok(Proof {
            w: w.into_affine(),
            random_v: None,
        })
    };
    {
        #[cfg(feature = "parallel")]
        {
            (0..domain.num_chunks()).into_par_iter()
        }
        #[cfg(not(feature = "parallel"))]
        {
            0..domain.num_chunks()
        }
    }
    .map(prove)
    .collect()
}

/// A chunk as received by a verifier: its index in the extended domain, its evaluations and
/// the opening proof for them.
#[derive(Clone, Copy, Debug)]
pub struct ChunkOpening<'a> {
    pub index: usize,
    pub evaluations: &'a [Fr],
    pub proof: &'a Proof,
}

pub(crate) fn pairing_check(
    g1: impl IntoIterator<Item = G1Affine>,
    g2: impl IntoIterator<Item = G2Affine>,
) -> bool {
    let qap = Bls12_381::multi_miller_loop(g1, g2);
    Bls12_381::final_exponentiation(qap)
        .is_some_and(|test: PairingOutput<Bls12_381>| test.is_zero())
}

/// Verify a single chunk against the blob commitment:
/// `e(C - [r(tau)]_1, [1]_2) == e(proof, [tau^l]_2 - z * [1]_2)` with `r` the interpolant of the
/// chunk evaluations and `z = h^l` the coset vanishing constant.
pub fn verify_chunk_proof(
    commitment: &Commitment,
    opening: ChunkOpening<'_>,
    domain: &ChunkDomain,
    srs: &Srs,
) -> Result<bool, KzgError> {
    if opening.evaluations.len() != domain.chunk_length()
        || opening.index >= domain.num_chunks()
    {
        return Ok(false);
    }
    let interpolant = domain.interpolate_chunk(opening.index, opening.evaluations);
    let interpolant_commitment =
        g1_linear_combination(srs.g1_powers(interpolant.len())?, &interpolant)?;
    let g2 = srs.g2_generator();
    let tau_l = srs.g2_power(domain.chunk_length())?;
    let vanishing = G2Projective::from(tau_l) - g2 * domain.vanishing_constant(opening.index);
    let lhs = G1Projective::from(commitment.0) - interpolant_commitment;
    Ok(pairing_check(
        [lhs.into_affine(), -opening.proof.w],
        [g2, vanishing.into_affine()],
    ))
}

/// Fiat-Shamir challenge binding every verified opening.
fn batch_challenge(commitment: &Commitment, openings: &[ChunkOpening<'_>]) -> Fr {
    let mut hasher = blake2::Blake2bVar::new(32)
        .unwrap_or_else(|e| panic!("Blake2b should work for size 32, {e}"));
    hasher.update(&commitment_to_bytes(commitment));
    for opening in openings {
        hasher.update(&(opening.index as u64).to_be_bytes());
        for evaluation in opening.evaluations {
            hasher.update(&field_element_to_bytes_be(evaluation));
        }
        hasher.update(&proof_to_bytes(opening.proof));
    }
    let mut buff = [0u8; 32];
    hasher
        .finalize_variable(&mut buff)
        .unwrap_or_else(|e| panic!("Output size is fixed to 32 bytes, {e}"));
    Fr::from_le_bytes_mod_order(&buff)
}

/// Verify all `openings` of one blob with a single pairing equation.
///
/// Each opening satisfies `C - R_k + z_k * pi_k == tau^l * pi_k` in the exponent. Those are
/// folded with powers of a random challenge `r` into
/// `e(sum r^k (C - R_k + z_k pi_k), [1]_2) == e(sum r^k pi_k, [tau^l]_2)`, and the interpolant
/// commitments `R_k` are accumulated in coefficient form so they cost one MSM.
/// Returns `false` if any opening is malformed or invalid, callers needing to know which one
/// fall back to [`verify_chunk_proof`].
pub fn batch_verify_chunk_proofs(
    commitment: &Commitment,
    openings: &[ChunkOpening<'_>],
    domain: &ChunkDomain,
    srs: &Srs,
) -> Result<bool, KzgError> {
    if openings.is_empty() {
        return Ok(true);
    }
    let chunk_length = domain.chunk_length();
    if openings
        .iter()
        .any(|o| o.evaluations.len() != chunk_length || o.index >= domain.num_chunks())
    {
        return Ok(false);
    }
    let challenge = batch_challenge(commitment, openings);
    let mut power = Fr::one();
    let mut power_sum = Fr::zero();
    let mut aggregated_interpolant = vec![Fr::zero(); chunk_length];
    let mut proof_scalars = Vec::with_capacity(openings.len());
    let mut folded_proof_scalars = Vec::with_capacity(openings.len());
    for opening in openings {
        let interpolant = domain.interpolate_chunk(opening.index, opening.evaluations);
        for (acc, coefficient) in aggregated_interpolant.iter_mut().zip(interpolant) {
            *acc += power * coefficient;
        }
        proof_scalars.push(power);
        folded_proof_scalars.push(power * domain.vanishing_constant(opening.index));
        power_sum += power;
        power *= challenge;
    }
    let proofs: Vec<G1Affine> = openings.iter().map(|o| o.proof.w).collect();
    let interpolants =
        g1_linear_combination(srs.g1_powers(chunk_length)?, &aggregated_interpolant)?;
    let lhs = G1Projective::from(commitment.0) * power_sum - interpolants
        + g1_linear_combination(&proofs, &folded_proof_scalars)?;
    let rhs = g1_linear_combination(&proofs, &proof_scalars)?;
    let tau_l = srs.g2_power(chunk_length)?;
    Ok(pairing_check(
        [lhs.into_affine(), (-rhs).into_affine()],
        [srs.g2_generator(), tau_l],
    ))
}
