pub mod common;
pub mod coset;
pub mod fk20;
pub mod kzg;
pub mod length;
pub mod srs;

use ark_bls12_381::{Bls12_381, Fr};
use ark_poly::GeneralEvaluationDomain;
use ark_poly_commit::kzg10;

pub use common::{
    field_element_from_bytes_be, field_element_to_bytes_be, pad_payload, remove_padding,
    symbols_from_bytes, symbols_to_bytes, KzgError,
};
pub use coset::{chunk_evaluations, ChunkDomain};
pub use fk20::{fk20_multi_reveal_proofs, Toeplitz1Cache};
pub use kzg::{
    batch_verify_chunk_proofs, commit_polynomial, direct_multi_reveal_proofs, verify_chunk_proof,
    ChunkOpening,
};
pub use length::{
    commit_length, prove_length, verify_commitment_equivalence, verify_length_proof,
    LengthCommitment, LengthProof,
};
pub use srs::{srs_from_file, srs_from_randomness, Srs};

pub type Commitment = kzg10::Commitment<Bls12_381>;
pub type Proof = kzg10::Proof<Bls12_381>;
pub type FieldElement = Fr;
pub type PolynomialEvaluationDomain = GeneralEvaluationDomain<Fr>;

/// Size in bytes of a serialized field element. Blob data is laid out as a sequence of
/// big-endian symbols of this size.
pub const BYTES_PER_SYMBOL: usize = 32;
/// Payload bytes carried by each symbol once the leading zero byte is added.
pub const PAYLOAD_BYTES_PER_SYMBOL: usize = BYTES_PER_SYMBOL - 1;
/// Compressed size of a G1 point (commitments and proofs).
pub const G1_COMPRESSED_SIZE: usize = 48;
/// Compressed size of a G2 point (length commitments and length proofs).
pub const G2_COMPRESSED_SIZE: usize = 96;
