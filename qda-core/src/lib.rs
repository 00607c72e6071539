pub mod assignment;
pub mod attestation;
pub mod batch;
pub mod blob;
pub mod encoding;
pub mod frame;
pub mod metadata;
pub mod operators;

pub use assignment::{
    check_operator_count, verify_coverage, Assignment, AssignmentError, ChunkAssigner,
};
pub use attestation::{Attestation, AttestationError, SignatureAccumulator, BLS_DST};
pub use batch::{BatchHeader, BlobInclusionInfo, MerkleTree};
pub use blob::{
    AccountId, BlobCertificate, BlobCommitments, BlobHeader, BlobKey, BlobVersion,
    PaymentMetadata, QuorumId, RelayKey,
};
pub use encoding::{
    BlobVersionParameters, EncodingParameterResolver, EncodingParams, ResolverError,
};
pub use frame::{BlobShard, Bundle, Frame, FrameError, IndexedFrame};
pub use metadata::{
    now_nanos, now_secs, BlobAttestationInfo, BlobMetadata, BlobStatus, FragmentInfo,
};
pub use operators::{
    IndexedOperatorState, OperatorId, OperatorInfo, OperatorState, OperatorStateError,
};

/// Keccak-256 helper shared by the hashing of headers, certificates and batches.
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    use sha3::{Digest, Keccak256};
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
