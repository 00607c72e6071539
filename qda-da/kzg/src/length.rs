// std
// crates
use ark_bls12_381::{Fr, G2Affine};
use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
// internal
use crate::common::KzgError;
use crate::kzg::{g2_linear_combination, pairing_check};
use crate::srs::Srs;
use crate::Commitment;

/// Commitment to the blob polynomial in G2, `[p(tau)]_2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, CanonicalSerialize, CanonicalDeserialize)]
pub struct LengthCommitment(pub G2Affine);

/// Proof that the committed polynomial has fewer than `length` coefficients,
/// `[tau^(D - length) p(tau)]_2` with `D` the number of G2 powers in the reference string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, CanonicalSerialize, CanonicalDeserialize)]
pub struct LengthProof(pub G2Affine);

fn shift_for(length: usize, srs: &Srs) -> Result<usize, KzgError> {
    let max = srs.g2_len();
    if length == 0 || length > max || max - length >= srs.g1_len() {
        return Err(KzgError::InvalidLength(length));
    }
    Ok(max - length)
}

pub fn commit_length(coefficients: &[Fr], srs: &Srs) -> Result<LengthCommitment, KzgError> {
    let bases = srs
        .powers_of_g2
        .get(..coefficients.len())
        .ok_or(KzgError::SrsTooSmall {
            required: coefficients.len(),
            available: srs.g2_len(),
        })?;
    Ok(LengthCommitment(
        g2_linear_combination(bases, coefficients)?.into_affine(),
    ))
}

pub fn prove_length(
    coefficients: &[Fr],
    length: usize,
    srs: &Srs,
) -> Result<LengthProof, KzgError> {
    if coefficients.len() > length {
        return Err(KzgError::InvalidLength(length));
    }
    let shift = shift_for(length, srs)?;
    let bases = &srs.powers_of_g2[shift..shift + coefficients.len()];
    Ok(LengthProof(
        g2_linear_combination(bases, coefficients)?.into_affine(),
    ))
}

/// `e([tau^(D - length)]_1, commitment) == e([1]_1, proof)`
pub fn verify_length_proof(
    commitment: &LengthCommitment,
    proof: &LengthProof,
    length: usize,
    srs: &Srs,
) -> bool {
    let Ok(shift) = shift_for(length, srs) else {
        return false;
    };
    pairing_check(
        [srs.powers_of_g1[shift], -srs.g1_generator()],
        [commitment.0, proof.0],
    )
}

/// Check that the G1 and G2 commitments bind the same polynomial.
pub fn verify_commitment_equivalence(
    commitment: &Commitment,
    length_commitment: &LengthCommitment,
    srs: &Srs,
) -> bool {
    pairing_check(
        [commitment.0, -srs.g1_generator()],
        [srs.g2_generator(), length_commitment.0],
    )
}

#[cfg(test)]
mod test {
    use super::{commit_length, prove_length, verify_commitment_equivalence, verify_length_proof};
    use crate::kzg::commit_polynomial;
    use crate::srs::{srs_from_randomness, Srs};
    use ark_bls12_381::Fr;
    use ark_ff::UniformRand;
    use once_cell::sync::Lazy;
    use rand::SeedableRng;

    static SRS: Lazy<Srs> = Lazy::new(|| {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1987);
        srs_from_randomness(64, 32, &mut rng)
    });

    fn coefficients(len: usize) -> Vec<Fr> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(len as u64);
        (0..len).map(|_| Fr::rand(&mut rng)).collect()
    }

    #[test]
    fn length_proof_round_trip() {
        let coefficients = coefficients(7);
        let commitment = commit_length(&coefficients, &SRS).unwrap();
        let proof = prove_length(&coefficients, 8, &SRS).unwrap();
        assert!(verify_length_proof(&commitment, &proof, 8, &SRS));
        // a proof for one length does not verify another
        assert!(!verify_length_proof(&commitment, &proof, 4, &SRS));
        assert!(!verify_length_proof(&commitment, &proof, 16, &SRS));
    }

    #[test]
    fn length_shorter_than_polynomial_cannot_be_proven() {
        let coefficients = coefficients(9);
        assert!(prove_length(&coefficients, 8, &SRS).is_err());
        assert!(prove_length(&coefficients, 64, &SRS).is_err());
    }

    #[test]
    fn commitments_are_equivalent() {
        let coefficients = coefficients(16);
        let g1 = commit_polynomial(&coefficients, &SRS).unwrap();
        let g2 = commit_length(&coefficients, &SRS).unwrap();
        assert!(verify_commitment_equivalence(&g1, &g2, &SRS));
        let other = commit_length(&coefficients[..15], &SRS).unwrap();
        assert!(!verify_commitment_equivalence(&g1, &other, &SRS));
    }
}
