// std
use std::io;
use std::sync::LazyLock;
// crates
use ark_bls12_381::{G1Affine, G2Affine};
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use num_bigint::BigUint;
use thiserror::Error;
// internal
use crate::{
    Commitment, FieldElement, Proof, BYTES_PER_SYMBOL, G1_COMPRESSED_SIZE, G2_COMPRESSED_SIZE,
    PAYLOAD_BYTES_PER_SYMBOL,
};

static MODULUS: LazyLock<BigUint> = LazyLock::new(|| BigUint::from(FieldElement::MODULUS));

#[derive(Error, Debug)]
pub enum KzgError {
    #[error("Data isn't properly padded, data len must match modulus {expected_modulus} but it is {current_size}")]
    UnpaddedDataError {
        expected_modulus: usize,
        current_size: usize,
    },
    #[error("Symbol {index} is not a canonical field element")]
    NonCanonicalSymbol { index: usize },
    #[error("Reference string holds {available} powers but {required} are required")]
    SrsTooSmall { required: usize, available: usize },
    #[error("Invalid evaluation domain of size {0}")]
    InvalidDomain(usize),
    #[error("Chunk layout {num_chunks}x{chunk_length} does not fit {coefficients} coefficients")]
    InvalidChunkLayout {
        num_chunks: usize,
        chunk_length: usize,
        coefficients: usize,
    },
    #[error("Multi scalar multiplication received mismatched inputs of size {0}")]
    MsmLength(usize),
    #[error("Length {0} is not a valid committed length")]
    InvalidLength(usize),
    #[error("Point serialization error: {0}")]
    Serialization(#[from] ark_serialize::SerializationError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decode a big-endian symbol into a field element.
/// Fails if the value does not fit below the field modulus instead of reducing it.
pub fn field_element_from_bytes_be(bytes: &[u8]) -> Option<FieldElement> {
    debug_assert!(bytes.len() <= BYTES_PER_SYMBOL);
    let value = BigUint::from_bytes_be(bytes);
    (value < *MODULUS).then(|| FieldElement::from(value))
}

pub fn field_element_to_bytes_be(element: &FieldElement) -> [u8; BYTES_PER_SYMBOL] {
    let mut buff = [0u8; BYTES_PER_SYMBOL];
    let bytes = element.into_bigint().to_bytes_be();
    buff[BYTES_PER_SYMBOL - bytes.len()..].copy_from_slice(&bytes);
    buff
}

/// Transform padded blob bytes into field elements, one per `BYTES_PER_SYMBOL` bytes.
pub fn symbols_from_bytes(data: &[u8]) -> Result<Vec<FieldElement>, KzgError> {
    if data.len() % BYTES_PER_SYMBOL != 0 {
        return Err(KzgError::UnpaddedDataError {
            expected_modulus: BYTES_PER_SYMBOL,
            current_size: data.len(),
        });
    }
    data.chunks(BYTES_PER_SYMBOL)
        .enumerate()
        .map(|(index, chunk)| {
            field_element_from_bytes_be(chunk).ok_or(KzgError::NonCanonicalSymbol { index })
        })
        .collect()
}

pub fn symbols_to_bytes(symbols: &[FieldElement]) -> Vec<u8> {
    symbols.iter().flat_map(field_element_to_bytes_be).collect()
}

/// Spread arbitrary bytes over symbols by prefixing every 31 byte group with a zero byte,
/// which keeps each symbol below the field modulus. The last group is zero filled.
pub fn pad_payload(payload: &[u8]) -> Vec<u8> {
    payload
        .chunks(PAYLOAD_BYTES_PER_SYMBOL)
        .flat_map(|chunk| {
            let mut symbol = [0u8; BYTES_PER_SYMBOL];
            symbol[1..=chunk.len()].copy_from_slice(chunk);
            symbol
        })
        .collect()
}

/// Inverse of [`pad_payload`]. Trailing zero filling of the last symbol is kept, callers that
/// need the exact payload track its length separately.
pub fn remove_padding(padded: &[u8]) -> Result<Vec<u8>, KzgError> {
    if padded.len() % BYTES_PER_SYMBOL != 0 {
        return Err(KzgError::UnpaddedDataError {
            expected_modulus: BYTES_PER_SYMBOL,
            current_size: padded.len(),
        });
    }
    Ok(padded
        .chunks(BYTES_PER_SYMBOL)
        .flat_map(|symbol| symbol[1..].iter().copied())
        .collect())
}

pub fn commitment_to_bytes(commitment: &Commitment) -> [u8; G1_COMPRESSED_SIZE] {
    g1_to_bytes(&commitment.0)
}

pub fn commitment_from_bytes(bytes: &[u8]) -> Result<Commitment, KzgError> {
    g1_from_bytes(bytes).map(ark_poly_commit::kzg10::Commitment)
}

pub fn proof_to_bytes(proof: &Proof) -> [u8; G1_COMPRESSED_SIZE] {
    g1_to_bytes(&proof.w)
}

pub fn proof_from_bytes(bytes: &[u8]) -> Result<Proof, KzgError> {
    g1_from_bytes(bytes).map(|w| Proof { w, random_v: None })
}

pub fn g1_to_bytes(point: &G1Affine) -> [u8; G1_COMPRESSED_SIZE] {
    let mut buff = [0u8; G1_COMPRESSED_SIZE];
    point
        .serialize_compressed(&mut buff[..])
        .unwrap_or_else(|e| panic!("Compressed G1 always fits {G1_COMPRESSED_SIZE} bytes: {e}"));
    buff
}

/// Decoding validates that the point is on the curve and in the prime order subgroup.
pub fn g1_from_bytes(bytes: &[u8]) -> Result<G1Affine, KzgError> {
    Ok(G1Affine::deserialize_compressed(bytes)?)
}

pub fn g2_to_bytes(point: &G2Affine) -> [u8; G2_COMPRESSED_SIZE] {
    let mut buff = [0u8; G2_COMPRESSED_SIZE];
    point
        .serialize_compressed(&mut buff[..])
        .unwrap_or_else(|e| panic!("Compressed G2 always fits {G2_COMPRESSED_SIZE} bytes: {e}"));
    buff
}

pub fn g2_from_bytes(bytes: &[u8]) -> Result<G2Affine, KzgError> {
    Ok(G2Affine::deserialize_compressed(bytes)?)
}
