// std
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
// crates
use ark_bls12_381::{Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::scalar_mul::fixed_base::FixedBase;
use ark_ec::{CurveGroup, Group};
use ark_ff::{PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rand::Rng;
// internal
use crate::common::KzgError;

/// Structured reference string: consecutive powers of the secret `tau` in both source groups.
/// G1 powers are used for commitments and opening proofs, G2 powers for length proofs and for
/// verifying openings over cosets.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Srs {
    pub powers_of_g1: Vec<G1Affine>,
    pub powers_of_g2: Vec<G2Affine>,
}

impl Srs {
    pub fn g1_len(&self) -> usize {
        self.powers_of_g1.len()
    }

    pub fn g2_len(&self) -> usize {
        self.powers_of_g2.len()
    }

    pub fn g1_generator(&self) -> G1Affine {
        self.powers_of_g1[0]
    }

    pub fn g2_generator(&self) -> G2Affine {
        self.powers_of_g2[0]
    }

    pub fn g1_powers(&self, required: usize) -> Result<&[G1Affine], KzgError> {
        self.powers_of_g1
            .get(..required)
            .ok_or(KzgError::SrsTooSmall {
                required,
                available: self.g1_len(),
            })
    }

    pub fn g2_power(&self, exponent: usize) -> Result<G2Affine, KzgError> {
        self.powers_of_g2
            .get(exponent)
            .copied()
            .ok_or(KzgError::SrsTooSmall {
                required: exponent + 1,
                available: self.g2_len(),
            })
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), KzgError> {
        let file = File::create(path)?;
        self.serialize_uncompressed(BufWriter::new(file))?;
        Ok(())
    }
}

fn powers_of_tau(tau: Fr, len: usize) -> Vec<Fr> {
    std::iter::successors(Some(Fr::from(1u64)), |power| Some(*power * tau))
        .take(len)
        .collect()
}

/// Generate a reference string from local randomness. Development and testing only: whoever
/// runs this knows `tau`.
pub fn srs_from_randomness<R: Rng>(g1_len: usize, g2_len: usize, rng: &mut R) -> Srs {
    let tau = Fr::rand(rng);
    let scalar_bits = Fr::MODULUS_BIT_SIZE as usize;

    let g1_scalars = powers_of_tau(tau, g1_len);
    let window_size = FixedBase::get_mul_window_size(g1_len);
    let g1_table = FixedBase::get_window_table(scalar_bits, window_size, G1Projective::generator());
    let powers_of_g1 = G1Projective::normalize_batch(&FixedBase::msm::<G1Projective>(
        scalar_bits,
        window_size,
        &g1_table,
        &g1_scalars,
    ));

    let g2_scalars = powers_of_tau(tau, g2_len);
    let window_size = FixedBase::get_mul_window_size(g2_len);
    let g2_table = FixedBase::get_window_table(scalar_bits, window_size, G2Projective::generator());
    let powers_of_g2 = G2Projective::normalize_batch(&FixedBase::msm::<G2Projective>(
        scalar_bits,
        window_size,
        &g2_table,
        &g2_scalars,
    ));

    Srs {
        powers_of_g1,
        powers_of_g2,
    }
}

/// Load a reference string written with [`Srs::write_to_file`].
/// Points are checked for curve and subgroup membership while decoding.
pub fn srs_from_file(path: impl AsRef<Path>) -> Result<Srs, KzgError> {
    let file = File::open(path)?;
    Ok(Srs::deserialize_uncompressed(BufReader::new(file))?)
}
