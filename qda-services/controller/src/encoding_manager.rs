// std
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
// crates
use qda_core::{
    now_secs, BlobCertificate, BlobKey, BlobMetadata, BlobStatus, EncodingParameterResolver,
    FragmentInfo, RelayKey, ResolverError,
};
use qda_da_storage::{
    ChunkStore, ChunkStoreError, MetadataStore, MetadataStoreError, ScanDirection,
    StatusCursor, StatusTransition,
};
use qda_encoding::{EncodingError, ErasureCoder};
use qda_kzg::{BYTES_PER_SYMBOL, G1_COMPRESSED_SIZE};
use qda_utils::WorkerPool;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
// internal
use crate::config::EncodingManagerConfig;
use crate::error::ControllerError;
use crate::metrics::EncodingManagerMetrics;

#[derive(Error, Debug)]
pub enum EncodeBlobError {
    #[error("Blob data of {0} is not in chunk storage")]
    BlobNotFound(BlobKey),
    #[error("Blob has {symbols} symbols but its header commits to length {committed}")]
    LengthMismatch { symbols: usize, committed: u32 },
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Chunks(#[from] ChunkStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataStoreError),
    #[error("Encoding task aborted: {0}")]
    Aborted(String),
    #[error("Timed out")]
    Timeout,
}

impl EncodeBlobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Encoding(e) => e.is_retryable(),
            Self::Chunks(e) => e.is_retryable(),
            Self::Metadata(e) => e.is_retryable(),
            Self::Timeout => true,
            Self::BlobNotFound(_)
            | Self::LengthMismatch { .. }
            | Self::Resolver(_)
            | Self::Aborted(_) => false,
        }
    }
}

/// What happened to one `Queued` blob in an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncodingOutcome {
    Encoded,
    /// Another manager moved the blob first.
    LostRace,
    /// Left `Queued` with one more retry recorded.
    Retrying,
    Failed,
    /// Untouched, either backing off or the status write did not go through.
    Deferred,
}

/// Moves blobs from `Queued` to `Encoded`, or to `Failed` once they run out of retries.
///
/// Every status change is a conditional write expecting `Queued`, so several managers can pull
/// from the same metadata store and each blob is encoded into the `Encoded` state once.
pub struct EncodingManager {
    config: EncodingManagerConfig,
    relays: Vec<RelayKey>,
    metadata: Arc<dyn MetadataStore>,
    chunks: Arc<dyn ChunkStore>,
    coder: ErasureCoder,
    resolver: EncodingParameterResolver,
    pool: Arc<WorkerPool>,
    backoff: Mutex<HashMap<BlobKey, Instant>>,
    cursor: Mutex<Option<StatusCursor>>,
    metrics: Option<EncodingManagerMetrics>,
}

impl EncodingManager {
    pub fn new(
        config: EncodingManagerConfig,
        metadata: Arc<dyn MetadataStore>,
        chunks: Arc<dyn ChunkStore>,
        coder: ErasureCoder,
        resolver: EncodingParameterResolver,
        pool: Arc<WorkerPool>,
        metrics: Option<EncodingManagerMetrics>,
    ) -> Self {
        let mut relays = config.available_relays.clone();
        relays.sort_unstable();
        relays.dedup();
        Self {
            config,
            relays,
            metadata,
            chunks,
            coder,
            resolver,
            pool,
            backoff: Mutex::new(HashMap::new()),
            cursor: Mutex::new(None),
            metrics,
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.pull_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.handle_batch().await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            debug!("Processed {} queued blobs", outcomes.len());
                        }
                        Ok(_) => {}
                        Err(e) => error!("Encoding iteration failed: {e}"),
                    }
                }
            }
        }
        debug!("Encoding manager stopped");
    }

    /// Pull the next page of `Queued` blobs and process them on the worker pool.
    pub async fn handle_batch(
        self: &Arc<Self>,
    ) -> Result<Vec<(BlobKey, EncodingOutcome)>, ControllerError> {
        let cursor = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let page = self
            .metadata
            .query_by_status(
                BlobStatus::Queued,
                cursor,
                self.config.max_num_blobs_per_iteration,
                ScanDirection::Forward,
            )
            .await?;
        // wrap around to the oldest entries once the end of the index is reached
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = page.next_cursor;

        let mut handles = Vec::with_capacity(page.items.len());
        for metadata in page.items {
            let key = metadata.blob_key();
            let manager = self.clone();
            let handle = self
                .pool
                .submit(async move { manager.handle_blob(metadata).await })
                .await?;
            handles.push((key, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            match handle.join().await {
                Ok(outcome) => outcomes.push((key, outcome)),
                Err(e) => warn!(blob_key = %key, "Encoding task did not complete: {e}"),
            }
        }
        Ok(outcomes)
    }

    /// Encode one blob and record the result. Never returns an error: every failure is turned
    /// into a retry or a terminal status.
    pub async fn handle_blob(&self, metadata: BlobMetadata) -> EncodingOutcome {
        let key = metadata.blob_key();
        if metadata.is_expired(now_secs()) {
            warn!(blob_key = %key, expiry = metadata.expiry, "Blob expired while queued");
            return self.fail(&key).await;
        }
        if self.in_backoff(&key) {
            trace!(blob_key = %key, "Blob is backing off");
            return EncodingOutcome::Deferred;
        }

        let started = Instant::now();
        let deadline = started + self.config.encoding_request_timeout;
        let result = self.encode_and_store(&metadata, deadline).await;

        match result {
            Ok(fragment_info) => {
                let transition =
                    StatusTransition::to(BlobStatus::Encoded).with_fragment_info(fragment_info);
                match self
                    .metadata
                    .compare_and_transition(&key, BlobStatus::Queued, transition)
                    .await
                {
                    Ok(_) => {
                        self.clear_backoff(&key);
                        if let Some(metrics) = &self.metrics {
                            metrics.record_encoded(started.elapsed());
                        }
                        info!(blob_key = %key, "Blob encoded");
                        EncodingOutcome::Encoded
                    }
                    Err(MetadataStoreError::ConditionFailed { actual, .. }) => {
                        debug!(blob_key = %key, status = %actual, "Blob moved by another manager");
                        EncodingOutcome::LostRace
                    }
                    Err(e) => {
                        let cause = EncodeBlobError::Metadata(e);
                        self.retry_or_fail(&metadata, &cause).await
                    }
                }
            }
            Err(e) if e.is_retryable() => self.retry_or_fail(&metadata, &e).await,
            Err(e) => {
                warn!(blob_key = %key, "Blob cannot be encoded: {e}");
                self.fail(&key).await
            }
        }
    }

    /// Everything must finish by `deadline`. A proof run that overruns it is still awaited, so
    /// the worker pool slot stays taken until the blocking work is really over.
    async fn encode_and_store(
        &self,
        metadata: &BlobMetadata,
        deadline: Instant,
    ) -> Result<FragmentInfo, EncodeBlobError> {
        let key = metadata.blob_key();
        let header = &metadata.header;
        let data = self
            .with_store_timeout(deadline, self.chunks.get_blob(&key))
            .await??
            .ok_or(EncodeBlobError::BlobNotFound(key))?;

        let symbols = data.len().div_ceil(BYTES_PER_SYMBOL);
        if symbols.next_power_of_two() != header.commitments.length as usize {
            return Err(EncodeBlobError::LengthMismatch {
                symbols,
                committed: header.commitments.length,
            });
        }
        let params = self.resolver.resolve(data.len(), header.version)?;

        let coder = self.coder.clone();
        let mut encoding = tokio::task::spawn_blocking(move || coder.encode(&data, params));
        let encoded = match tokio::time::timeout_at(deadline, &mut encoding).await {
            Ok(joined) => joined.map_err(|e| EncodeBlobError::Aborted(e.to_string()))??,
            Err(_) => {
                warn!(blob_key = %key, "Encoding overran its deadline, waiting for it to stop");
                let _ = encoding.await;
                return Err(EncodeBlobError::Timeout);
            }
        };

        self.with_store_timeout(deadline, self.chunks.put_frames(&key, &encoded.frames))
            .await??;

        let certificate = BlobCertificate {
            header: header.clone(),
            relay_keys: self.relay_keys(&key),
        };
        match self
            .with_store_timeout(deadline, self.metadata.put_blob_certificate(certificate))
            .await?
        {
            // written by an earlier attempt
            Ok(()) | Err(MetadataStoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let fragment_size_bytes = (G1_COMPRESSED_SIZE + params.chunk_size_bytes()) as u64;
        Ok(FragmentInfo {
            total_chunk_size_bytes: fragment_size_bytes * u64::from(params.num_chunks),
            fragment_size_bytes,
        })
    }

    async fn with_store_timeout<F: Future>(
        &self,
        deadline: Instant,
        future: F,
    ) -> Result<F::Output, EncodeBlobError> {
        let store_deadline = (Instant::now() + self.config.store_timeout).min(deadline);
        tokio::time::timeout_at(store_deadline, future)
            .await
            .map_err(|_| EncodeBlobError::Timeout)
    }

    async fn retry_or_fail(
        &self,
        metadata: &BlobMetadata,
        cause: &EncodeBlobError,
    ) -> EncodingOutcome {
        let key = metadata.blob_key();
        if metadata.num_retries >= self.config.num_encoding_retries {
            warn!(
                blob_key = %key,
                retries = metadata.num_retries,
                "Blob exhausted its encoding retries: {cause}"
            );
            return self.fail(&key).await;
        }
        match self
            .metadata
            .compare_and_transition(&key, BlobStatus::Queued, StatusTransition::retry())
            .await
        {
            Ok(updated) => {
                self.backoff
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, Instant::now() + self.config.retry_backoff);
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry();
                }
                info!(
                    blob_key = %key,
                    retries = updated.num_retries,
                    "Encoding failed, will retry: {cause}"
                );
                EncodingOutcome::Retrying
            }
            Err(MetadataStoreError::ConditionFailed { .. }) => EncodingOutcome::LostRace,
            Err(e) => {
                error!(blob_key = %key, "Failed to record encoding retry: {e}");
                EncodingOutcome::Deferred
            }
        }
    }

    async fn fail(&self, key: &BlobKey) -> EncodingOutcome {
        self.clear_backoff(key);
        match self
            .metadata
            .compare_and_transition(
                key,
                BlobStatus::Queued,
                StatusTransition::to(BlobStatus::Failed),
            )
            .await
        {
            Ok(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failed();
                }
                EncodingOutcome::Failed
            }
            Err(MetadataStoreError::ConditionFailed { .. }) => EncodingOutcome::LostRace,
            Err(e) => {
                error!(blob_key = %key, "Failed to mark blob failed: {e}");
                EncodingOutcome::Deferred
            }
        }
    }

    fn in_backoff(&self, key: &BlobKey) -> bool {
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        backoff.retain(|_, until| *until > now);
        backoff.contains_key(key)
    }

    fn clear_backoff(&self, key: &BlobKey) {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// `num_relay_assignment` consecutive relays starting at a position derived from the key.
    pub fn relay_keys(&self, key: &BlobKey) -> Vec<RelayKey> {
        if self.relays.is_empty() {
            return Vec::new();
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&key.as_bytes()[..4]);
        let start = u32::from_be_bytes(prefix) as usize % self.relays.len();
        self.relays
            .iter()
            .cycle()
            .skip(start)
            .take(self.config.num_relay_assignment.min(self.relays.len()))
            .copied()
            .collect()
    }
}
