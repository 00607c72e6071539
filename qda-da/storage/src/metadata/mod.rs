pub mod memory;

// std
// crates
use async_trait::async_trait;
use qda_core::{
    Attestation, BatchHeader, BlobAttestationInfo, BlobCertificate, BlobInclusionInfo, BlobKey,
    BlobMetadata, BlobStatus, FragmentInfo,
};
use thiserror::Error;
// internal

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataStoreError {
    #[error("Blob {0} not found")]
    NotFound(BlobKey),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("Blob {key} is {actual}, expected {expected}")]
    ConditionFailed {
        key: BlobKey,
        expected: BlobStatus,
        actual: BlobStatus,
    },
    #[error("Blob {key} cannot move from {from} to {to}")]
    InvalidTransition {
        key: BlobKey,
        from: BlobStatus,
        to: BlobStatus,
    },
    #[error("Metadata backend error: {0}")]
    Backend(String),
}

impl MetadataStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Update applied by [`MetadataStore::compare_and_transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusTransition {
    pub status: BlobStatus,
    pub bump_retries: bool,
    pub fragment_info: Option<FragmentInfo>,
}

impl StatusTransition {
    pub fn to(status: BlobStatus) -> Self {
        Self {
            status,
            bump_retries: false,
            fragment_info: None,
        }
    }

    /// Stay `Queued` with one more retry recorded.
    pub fn retry() -> Self {
        Self {
            status: BlobStatus::Queued,
            bump_retries: true,
            fragment_info: None,
        }
    }

    pub fn with_fragment_info(mut self, fragment_info: FragmentInfo) -> Self {
        self.fragment_info = Some(fragment_info);
        self
    }
}

/// Exclusive start position of a status query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatusCursor {
    pub updated_at: u64,
    pub blob_key: BlobKey,
}

impl From<&BlobMetadata> for StatusCursor {
    fn from(metadata: &BlobMetadata) -> Self {
        Self {
            updated_at: metadata.updated_at,
            blob_key: metadata.blob_key(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanDirection {
    /// Oldest update first.
    #[default]
    Forward,
    Backward,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusPage {
    pub items: Vec<BlobMetadata>,
    /// Set when more items follow the last returned one.
    pub next_cursor: Option<StatusCursor>,
}

/// Blob metadata keyed by blob key, with a secondary index on `(status, updated_at)`.
///
/// Status changes go exclusively through [`MetadataStore::compare_and_transition`], which
/// applies the update only if the stored status still equals the expected one. Implementations
/// must make the check and the write a single atomic step.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_blob_metadata(&self, metadata: BlobMetadata) -> Result<(), MetadataStoreError>;

    async fn get_blob_metadata(
        &self,
        key: &BlobKey,
    ) -> Result<Option<BlobMetadata>, MetadataStoreError>;

    async fn compare_and_transition(
        &self,
        key: &BlobKey,
        expected: BlobStatus,
        transition: StatusTransition,
    ) -> Result<BlobMetadata, MetadataStoreError>;

    async fn query_by_status(
        &self,
        status: BlobStatus,
        cursor: Option<StatusCursor>,
        limit: usize,
        direction: ScanDirection,
    ) -> Result<StatusPage, MetadataStoreError>;

    async fn put_blob_certificate(
        &self,
        certificate: BlobCertificate,
    ) -> Result<(), MetadataStoreError>;

    async fn get_blob_certificate(
        &self,
        key: &BlobKey,
    ) -> Result<Option<BlobCertificate>, MetadataStoreError>;

    async fn put_batch_header(&self, header: BatchHeader) -> Result<(), MetadataStoreError>;

    async fn get_batch_header(
        &self,
        batch_hash: &[u8; 32],
    ) -> Result<Option<BatchHeader>, MetadataStoreError>;

    async fn put_inclusion_info(
        &self,
        batch_hash: [u8; 32],
        info: BlobInclusionInfo,
    ) -> Result<(), MetadataStoreError>;

    async fn get_inclusion_info(
        &self,
        key: &BlobKey,
    ) -> Result<Option<([u8; 32], BlobInclusionInfo)>, MetadataStoreError>;

    /// Attestations are immutable: a second write for the same batch fails.
    async fn put_attestation(&self, attestation: Attestation) -> Result<(), MetadataStoreError>;

    async fn get_attestation(
        &self,
        batch_hash: &[u8; 32],
    ) -> Result<Option<Attestation>, MetadataStoreError>;

    async fn get_blob_attestation_info(
        &self,
        key: &BlobKey,
    ) -> Result<Option<BlobAttestationInfo>, MetadataStoreError> {
        let Some((batch_hash, inclusion_info)) = self.get_inclusion_info(key).await? else {
            return Ok(None);
        };
        Ok(self
            .get_attestation(&batch_hash)
            .await?
            .map(|attestation| BlobAttestationInfo {
                inclusion_info,
                attestation,
            }))
    }
}
