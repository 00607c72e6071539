// std
// crates
use qda_core::AttestationError;
use qda_da_storage::{ChunkStoreError, MetadataStoreError};
use qda_tracing::LoggingError;
use qda_utils::WorkerPoolError;
use thiserror::Error;
// internal
use crate::chain_state::ChainStateError;
use crate::config::ConfigError;
use crate::signer::SignerError;

/// Failure of a whole loop iteration. Per blob failures never surface here, they end up as
/// status transitions.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Metadata(#[from] MetadataStoreError),
    #[error(transparent)]
    Chunks(#[from] ChunkStoreError),
    #[error(transparent)]
    ChainState(#[from] ChainStateError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    Pool(#[from] WorkerPoolError),
    #[error(transparent)]
    Attestation(#[from] AttestationError),
}
