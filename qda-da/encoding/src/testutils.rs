// std
use std::sync::Arc;
// crates
use ark_bls12_381::Fr;
use ark_ff::UniformRand;
use once_cell::sync::Lazy;
use qda_kzg::{field_element_to_bytes_be, srs_from_randomness, Srs};
use rand::SeedableRng;
// internal

/// Small reference string from a fixed seed: 512 G1 and 64 G2 powers.
pub static TEST_SRS: Lazy<Arc<Srs>> = Lazy::new(|| {
    let mut rng = rand::rngs::StdRng::seed_from_u64(1987);
    Arc::new(srs_from_randomness(512, 64, &mut rng))
});

/// `symbols` random canonical symbols.
pub fn random_blob(symbols: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..symbols)
        .flat_map(|_| field_element_to_bytes_be(&Fr::rand(&mut rng)))
        .collect()
}
