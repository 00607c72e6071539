// std
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
// crates
use blst::min_sig::Signature;
use itertools::Itertools;
use qda_core::{
    check_operator_count, now_nanos, AssignmentError, Attestation, BatchHeader,
    BlobCertificate, BlobKey, BlobMetadata, BlobShard, BlobStatus, Bundle, ChunkAssigner,
    EncodingParameterResolver, IndexedFrame, IndexedOperatorState, OperatorId, QuorumId,
    ResolverError, SignatureAccumulator,
};
use qda_da_storage::{
    ChunkStore, ChunkStoreError, MetadataStore, MetadataStoreError, ScanDirection,
    StatusTransition,
};
use qda_kzg::BYTES_PER_SYMBOL;
use qda_utils::WorkerPool;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
// internal
use crate::chain_state::OperatorStateCache;
use crate::config::DispatcherConfig;
use crate::error::ControllerError;
use crate::metrics::{BatchOutcome, DispatcherMetrics};
use crate::signer::{RequestSigner, SignerError};
use crate::transport::{NodeTransport, StoreChunksRequest, TransportError};

/// Reasons a claimed blob is dropped from a batch before anything is sent.
#[derive(Error, Debug)]
pub enum PrepareBlobError {
    #[error("No certificate stored for blob {0}")]
    MissingCertificate(BlobKey),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error("Chunk {index} of blob {key} is missing from chunk storage")]
    MissingChunk { key: BlobKey, index: u32 },
    #[error(transparent)]
    Chunks(#[from] ChunkStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataStoreError),
}

/// Result of one dispatched batch.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub batch_header: BatchHeader,
    pub quorum_results: BTreeMap<QuorumId, u8>,
    pub attestation: Option<Attestation>,
    pub complete: Vec<BlobKey>,
    pub failed: Vec<BlobKey>,
}

struct PreparedBlob {
    key: BlobKey,
    certificate: BlobCertificate,
    bundles: BTreeMap<OperatorId, BTreeMap<QuorumId, Bundle>>,
}

/// Moves `Encoded` blobs through `GatheringSignatures` to `Complete` or `Failed`.
///
/// Each iteration claims up to `max_batch_size` blobs, sends every operator the chunks it is
/// assigned and collects signatures over the batch header until either every quorum reaches
/// its confirmation threshold, every operator answered, or the batch window closes.
pub struct Dispatcher {
    config: DispatcherConfig,
    metadata: Arc<dyn MetadataStore>,
    chunks: Arc<dyn ChunkStore>,
    chain_state: Arc<OperatorStateCache>,
    transport: Arc<dyn NodeTransport>,
    signer: Arc<dyn RequestSigner>,
    resolver: EncodingParameterResolver,
    assigner: ChunkAssigner,
    pool: Arc<WorkerPool>,
    metrics: Option<DispatcherMetrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DispatcherConfig,
        metadata: Arc<dyn MetadataStore>,
        chunks: Arc<dyn ChunkStore>,
        chain_state: Arc<OperatorStateCache>,
        transport: Arc<dyn NodeTransport>,
        signer: Arc<dyn RequestSigner>,
        resolver: EncodingParameterResolver,
        pool: Arc<WorkerPool>,
        metrics: Option<DispatcherMetrics>,
    ) -> Self {
        let assigner = ChunkAssigner::new(config.default_confirmation_threshold)
            .with_quorum_thresholds(config.quorum_confirmation_thresholds.clone());
        Self {
            config,
            metadata,
            chunks,
            chain_state,
            transport,
            signer,
            resolver,
            assigner,
            pool,
            metrics,
        }
    }

    pub fn assigner(&self) -> &ChunkAssigner {
        &self.assigner
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.pull_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.handle_batch(&cancel).await {
                        Ok(Some(report)) => info!(
                            batch = %const_hex::encode(report.batch_header.batch_root),
                            complete = report.complete.len(),
                            failed = report.failed.len(),
                            "Batch dispatched"
                        ),
                        Ok(None) => {}
                        Err(e) => error!("Dispatch iteration failed: {e}"),
                    }
                }
            }
        }
        debug!("Dispatcher stopped");
    }

    /// Dispatch the oldest `Encoded` blobs as one batch. Returns `None` when there was nothing
    /// to claim.
    pub async fn handle_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<BatchReport>, ControllerError> {
        let page = self
            .metadata
            .query_by_status(
                BlobStatus::Encoded,
                None,
                self.config.max_batch_size,
                ScanDirection::Forward,
            )
            .await?;
        if page.items.is_empty() {
            return Ok(None);
        }
        let quorums: Vec<QuorumId> = page
            .items
            .iter()
            .flat_map(|metadata| metadata.header.quorum_numbers.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let state = self.chain_state.state_for(&quorums).await?;

        let claimed = self.claim(page.items).await;
        if claimed.is_empty() {
            return Ok(None);
        }

        let mut prepared = Vec::with_capacity(claimed.len());
        let mut failed = Vec::new();
        for metadata in &claimed {
            let key = metadata.blob_key();
            match self.prepare_blob(&key, &state).await {
                Ok(blob) => prepared.push(blob),
                Err(e) => {
                    warn!(blob_key = %key, "Dropping blob from batch: {e}");
                    failed.push(key);
                }
            }
        }
        self.finish(&failed, BlobStatus::Failed).await;
        if prepared.is_empty() {
            return Ok(None);
        }

        let prepared_keys: Vec<BlobKey> = prepared.iter().map(|blob| blob.key).collect();
        match self.dispatch(prepared, state, cancel).await {
            Ok(mut report) => {
                report.failed.extend(failed);
                Ok(Some(report))
            }
            Err(e) => {
                self.finish(&prepared_keys, BlobStatus::Failed).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_batch(BatchOutcome::Failed);
                }
                Err(e)
            }
        }
    }

    async fn claim(&self, candidates: Vec<BlobMetadata>) -> Vec<BlobMetadata> {
        let mut claimed = Vec::with_capacity(candidates.len());
        for metadata in candidates {
            let key = metadata.blob_key();
            match self
                .metadata
                .compare_and_transition(
                    &key,
                    BlobStatus::Encoded,
                    StatusTransition::to(BlobStatus::GatheringSignatures),
                )
                .await
            {
                Ok(updated) => claimed.push(updated),
                Err(MetadataStoreError::ConditionFailed { actual, .. }) => {
                    debug!(blob_key = %key, status = %actual, "Blob claimed by another dispatcher");
                }
                Err(e) => warn!(blob_key = %key, "Failed to claim blob: {e}"),
            }
        }
        claimed
    }

    /// Load the certificate and chunks of a blob and split them into per operator bundles.
    async fn prepare_blob(
        &self,
        key: &BlobKey,
        state: &IndexedOperatorState,
    ) -> Result<PreparedBlob, PrepareBlobError> {
        let certificate = self
            .metadata
            .get_blob_certificate(key)
            .await?
            .ok_or(PrepareBlobError::MissingCertificate(*key))?;
        let header = &certificate.header;
        let blob_length = header.commitments.length as usize * BYTES_PER_SYMBOL;
        let params = self.resolver.resolve(blob_length, header.version)?;
        let version = self.resolver.version_parameters(header.version)?;
        let indices: Vec<u32> = (0..params.num_chunks).collect();
        let frames = self.chunks.get_frames(key, &indices).await?;

        let mut bundles: BTreeMap<OperatorId, BTreeMap<QuorumId, Bundle>> = BTreeMap::new();
        for quorum in header.quorum_numbers.iter().copied().unique() {
            check_operator_count(&state.state, quorum, version)?;
            for (operator, assignment) in
                self.assigner.assignments(&state.state, &params, quorum)?
            {
                if assignment.num_chunks == 0 {
                    continue;
                }
                let chunks = assignment
                    .indices(params.num_chunks)
                    .map(|index| {
                        let frame = frames
                            .get(index as usize)
                            .cloned()
                            .ok_or(PrepareBlobError::MissingChunk { key: *key, index })?;
                        Ok(IndexedFrame { index, frame })
                    })
                    .collect::<Result<Vec<_>, PrepareBlobError>>()?;
                bundles
                    .entry(operator)
                    .or_default()
                    .insert(quorum, Bundle { chunks });
            }
        }
        Ok(PreparedBlob {
            key: *key,
            certificate,
            bundles,
        })
    }

    async fn dispatch(
        &self,
        prepared: Vec<PreparedBlob>,
        state: Arc<IndexedOperatorState>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, ControllerError> {
        let certificates: Vec<BlobCertificate> = prepared
            .iter()
            .map(|blob| blob.certificate.clone())
            .collect();
        let (batch_header, inclusions) =
            BatchHeader::from_certificates(&certificates, state.block_number());
        let batch_hash = batch_header.hash();
        self.metadata.put_batch_header(batch_header).await?;
        for inclusion in inclusions {
            self.metadata.put_inclusion_info(batch_hash, inclusion).await?;
        }

        let signature = match self
            .signer
            .sign(&StoreChunksRequest::signing_hash(
                &batch_header,
                self.config.disperser_id,
            ))
            .await
        {
            Ok(signature) => signature,
            Err(SignerError::Disabled) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut shards: BTreeMap<OperatorId, Vec<BlobShard>> = BTreeMap::new();
        for blob in &prepared {
            for (operator, bundles) in &blob.bundles {
                shards.entry(*operator).or_default().push(BlobShard {
                    certificate: blob.certificate.clone(),
                    bundles: bundles.clone(),
                });
            }
        }
        let mut requests = Vec::with_capacity(shards.len());
        for (operator, shards) in shards {
            let Some(socket) = state.state.socket(&operator) else {
                warn!("No socket registered for operator {operator}");
                self.record_operator_failure();
                continue;
            };
            let request = StoreChunksRequest {
                batch_header,
                shards,
                disperser_id: self.config.disperser_id,
                signature: signature.clone(),
            };
            requests.push((operator, socket.to_string(), request));
        }

        let quorums: Vec<QuorumId> = prepared
            .iter()
            .flat_map(|blob| blob.certificate.header.quorum_numbers.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let started = Instant::now();
        let accumulator = self
            .collect_signatures(
                SignatureAccumulator::new(state, batch_header, quorums),
                requests,
                cancel,
            )
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.record_attestation_latency(started.elapsed());
        }

        self.conclude(batch_header, &prepared, &accumulator).await
    }

    /// Send every request through the worker pool and fold the answers into `accumulator`
    /// until the batch can be concluded.
    async fn collect_signatures(
        &self,
        mut accumulator: SignatureAccumulator,
        requests: Vec<(OperatorId, String, StoreChunksRequest)>,
        cancel: &CancellationToken,
    ) -> SignatureAccumulator {
        let total = requests.len();
        let (sender, mut receiver) = mpsc::channel(total.max(1));
        let batch_cancel = cancel.child_token();
        let fan_out = {
            let pool = self.pool.clone();
            let transport = self.transport.clone();
            let retries = self.config.num_request_retries;
            let timeout = self.config.attestation_timeout;
            let batch_cancel = batch_cancel.clone();
            tokio::spawn(async move {
                for (operator, socket, request) in requests {
                    let transport = transport.clone();
                    let sender = sender.clone();
                    let batch_cancel = batch_cancel.clone();
                    let job = async move {
                        tokio::select! {
                            _ = batch_cancel.cancelled() => {}
                            result = send_with_retries(
                                transport.as_ref(),
                                &operator,
                                &socket,
                                &request,
                                retries,
                                timeout,
                            ) => {
                                let _ = sender.send((operator, result)).await;
                            }
                        }
                    };
                    if let Err(e) = pool.submit(job).await {
                        warn!("Failed to queue request to operator {operator}: {e}");
                        break;
                    }
                }
            })
        };

        let deadline = tokio::time::sleep(self.config.batch_attestation_timeout);
        tokio::pin!(deadline);
        let mut tick = tokio::time::interval(self.config.signature_tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut responded = 0;
        while responded < total {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down with signatures still pending");
                    break;
                }
                _ = &mut deadline => {
                    warn!(responded, total, "Batch attestation window closed");
                    break;
                }
                _ = tick.tick() => {
                    if self.thresholds_met(&accumulator) {
                        debug!(responded, total, "Confirmation thresholds reached");
                        break;
                    }
                }
                response = receiver.recv() => {
                    let Some((operator, result)) = response else {
                        break;
                    };
                    responded += 1;
                    match result {
                        Ok(signature) => {
                            if let Err(e) = accumulator.add(operator, signature) {
                                warn!("Discarding signature of operator {operator}: {e}");
                                self.record_operator_failure();
                            }
                        }
                        Err(e) => {
                            warn!("Operator {operator} did not sign: {e}");
                            self.record_operator_failure();
                        }
                    }
                }
            }
        }
        batch_cancel.cancel();
        fan_out.abort();
        accumulator
    }

    fn thresholds_met(&self, accumulator: &SignatureAccumulator) -> bool {
        accumulator.quorums().iter().all(|quorum| {
            accumulator
                .signed_percentage(*quorum)
                .is_ok_and(|signed| signed >= self.assigner.confirmation_threshold(*quorum))
        })
    }

    /// Store the attestation and move every blob to its terminal status. A blob completes when
    /// all of its quorums reached their confirmation threshold.
    async fn conclude(
        &self,
        batch_header: BatchHeader,
        prepared: &[PreparedBlob],
        accumulator: &SignatureAccumulator,
    ) -> Result<BatchReport, ControllerError> {
        let quorum_results = accumulator.quorum_results()?;
        for (quorum, signed) in &quorum_results {
            let breach = *signed < self.config.significant_signing_threshold_percentage;
            if breach {
                warn!(quorum, signed, "Signed stake below the significant signing threshold");
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_signed_stake(*quorum, *signed, breach);
            }
        }

        let confirmed = |blob: &PreparedBlob| {
            blob.certificate.header.quorum_numbers.iter().all(|quorum| {
                quorum_results
                    .get(quorum)
                    .is_some_and(|signed| *signed >= self.assigner.confirmation_threshold(*quorum))
            })
        };
        let (mut complete, mut failed): (Vec<BlobKey>, Vec<BlobKey>) = prepared
            .iter()
            .partition_map(|blob| {
                if confirmed(blob) {
                    itertools::Either::Left(blob.key)
                } else {
                    itertools::Either::Right(blob.key)
                }
            });

        let mut attestation = None;
        if !complete.is_empty() {
            match accumulator.finalize(now_nanos()) {
                Ok(finalized) => match self.metadata.put_attestation(finalized.clone()).await {
                    Ok(()) => attestation = Some(finalized),
                    Err(e) => error!("Failed to store attestation: {e}"),
                },
                Err(e) => error!("Failed to aggregate signatures: {e}"),
            }
            if attestation.is_none() {
                failed.append(&mut complete);
            }
        }

        self.finish(&complete, BlobStatus::Complete).await;
        self.finish(&failed, BlobStatus::Failed).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_batch(if complete.is_empty() {
                BatchOutcome::Failed
            } else {
                BatchOutcome::Complete
            });
        }
        Ok(BatchReport {
            batch_header,
            quorum_results,
            attestation,
            complete,
            failed,
        })
    }

    async fn finish(&self, keys: &[BlobKey], status: BlobStatus) {
        for key in keys {
            if let Err(e) = self
                .metadata
                .compare_and_transition(
                    key,
                    BlobStatus::GatheringSignatures,
                    StatusTransition::to(status),
                )
                .await
            {
                error!(blob_key = %key, "Failed to move blob to {status}: {e}");
            }
        }
    }

    fn record_operator_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operator_failure();
        }
    }
}

/// One request with up to `retries` extra attempts on retryable transport errors, each bounded
/// by `timeout`.
async fn send_with_retries(
    transport: &dyn NodeTransport,
    operator: &OperatorId,
    socket: &str,
    request: &StoreChunksRequest,
    retries: u32,
    timeout: Duration,
) -> Result<Signature, TransportError> {
    let mut attempt = 0;
    loop {
        let result = tokio::time::timeout(
            timeout,
            transport.send_chunks(operator, socket, request, timeout),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));
        match result {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                debug!(attempt, "Retrying request to operator {operator}: {e}");
            }
            result => return result,
        }
    }
}
