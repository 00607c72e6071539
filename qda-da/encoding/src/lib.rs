pub mod backend;
pub mod encoder;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;
pub mod validator;

pub use backend::{ChunkProofBackend, Fk20Backend, ProofBackendKind, ReferenceBackend};
pub use encoder::{EncodedBlob, EncodingError, ErasureCoder};
pub use validator::{validate_batch_header, ShardValidator, ValidationError, ValidationFailure};
