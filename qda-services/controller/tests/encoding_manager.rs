mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ark_bls12_381::Fr;
use qda_controller::{
    encode_metrics, new_registry, EncodingManager, EncodingManagerConfig,
    EncodingManagerMetrics, EncodingOutcome,
};
use qda_core::{now_secs, BlobStatus};
use qda_da_storage::{ChunkStore, MetadataStore};
use qda_encoding::testutils::TEST_SRS;
use qda_encoding::{ChunkProofBackend, EncodingError, ErasureCoder, ProofBackendKind};
use qda_kzg::{KzgError, Proof};
use qda_utils::WorkerPool;

use common::{coder, coder_with, encoding_config, far_expiry, resolver, Stores};

struct FailingBackend;

impl ChunkProofBackend for FailingBackend {
    fn compute_chunk_proofs(
        &self,
        _coefficients: &[Fr],
        _num_chunks: usize,
        _chunk_length: usize,
    ) -> Result<Vec<Proof>, EncodingError> {
        Err(EncodingError::Backend(KzgError::InvalidDomain(0)))
    }
}

/// Real proofs after a fixed delay, counting how many runs overlap.
struct SlowBackend {
    inner: Arc<dyn ChunkProofBackend>,
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowBackend {
    fn new(delay: Duration) -> Self {
        Self {
            inner: ProofBackendKind::Fk20.build(TEST_SRS.clone()),
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl ChunkProofBackend for SlowBackend {
    fn compute_chunk_proofs(
        &self,
        coefficients: &[Fr],
        num_chunks: usize,
        chunk_length: usize,
    ) -> Result<Vec<Proof>, EncodingError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.inner
            .compute_chunk_proofs(coefficients, num_chunks, chunk_length)
    }
}

fn manager(
    stores: &Stores,
    config: EncodingManagerConfig,
    coder: ErasureCoder,
    metrics: Option<EncodingManagerMetrics>,
) -> Arc<EncodingManager> {
    manager_with_workers(stores, config, coder, metrics, 4)
}

fn manager_with_workers(
    stores: &Stores,
    config: EncodingManagerConfig,
    coder: ErasureCoder,
    metrics: Option<EncodingManagerMetrics>,
    workers: usize,
) -> Arc<EncodingManager> {
    Arc::new(EncodingManager::new(
        config,
        stores.metadata.clone(),
        stores.chunks.clone(),
        coder,
        resolver(),
        Arc::new(WorkerPool::new(workers, 16)),
        metrics,
    ))
}

#[tokio::test]
async fn queued_blobs_are_encoded_and_certified() {
    let stores = Stores::new();
    let registry = new_registry();
    let manager = manager(
        &stores,
        encoding_config(),
        coder(),
        Some(EncodingManagerMetrics::new(&registry)),
    );
    let first = stores.queue_blob(1, far_expiry()).await;
    let second = stores.queue_blob(2, far_expiry()).await;

    let mut outcomes = manager.handle_batch().await.unwrap();
    outcomes.sort();
    let mut expected = vec![
        (first, EncodingOutcome::Encoded),
        (second, EncodingOutcome::Encoded),
    ];
    expected.sort();
    assert_eq!(outcomes, expected);

    for key in [first, second] {
        let metadata = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
        assert_eq!(metadata.status, BlobStatus::Encoded);
        let fragment_info = metadata.fragment_info.unwrap();
        // 48 byte proof plus 4 symbols per chunk, 16 chunks
        assert_eq!(fragment_info.fragment_size_bytes, 48 + 4 * 32);
        assert_eq!(fragment_info.total_chunk_size_bytes, 16 * (48 + 4 * 32));
        assert_eq!(stores.chunks.num_chunks(&key).await, 16);

        let certificate = stores
            .metadata
            .get_blob_certificate(&key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(certificate.header, metadata.header);
        assert_eq!(certificate.relay_keys, manager.relay_keys(&key));
        assert_eq!(certificate.relay_keys.len(), 2);
    }

    // nothing left to pull
    assert!(manager.handle_batch().await.unwrap().is_empty());
    let text = encode_metrics(&registry).unwrap();
    assert!(text.contains("encoding_manager_blobs_encoded_total 2"));
}

#[tokio::test]
async fn racing_managers_encode_once() {
    let stores = Stores::new();
    let key = stores.queue_blob(7, far_expiry()).await;
    let metadata = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();

    let first = manager(&stores, encoding_config(), coder(), None);
    let second = manager(&stores, encoding_config(), coder(), None);
    let (a, b) = tokio::join!(
        first.handle_blob(metadata.clone()),
        second.handle_blob(metadata)
    );

    let mut outcomes = vec![a, b];
    outcomes.sort();
    assert_eq!(
        outcomes,
        vec![EncodingOutcome::Encoded, EncodingOutcome::LostRace]
    );
    let stored = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
    assert_eq!(stored.status, BlobStatus::Encoded);
    assert_eq!(stored.num_retries, 0);
}

#[tokio::test]
async fn retry_limit_ends_in_failed() {
    let stores = Stores::new();
    let config = EncodingManagerConfig {
        num_encoding_retries: 2,
        ..encoding_config()
    };
    let manager = manager(&stores, config, coder_with(Arc::new(FailingBackend)), None);
    let key = stores.queue_blob(3, far_expiry()).await;

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let batch = manager.handle_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        outcomes.push(batch[0].1);
        // the blob is never observed outside of queued or failed
        assert!(matches!(
            stores.status(&key).await,
            BlobStatus::Queued | BlobStatus::Failed
        ));
    }
    assert_eq!(
        outcomes,
        vec![
            EncodingOutcome::Retrying,
            EncodingOutcome::Retrying,
            EncodingOutcome::Failed
        ]
    );
    let stored = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
    assert_eq!(stored.status, BlobStatus::Failed);
    assert_eq!(stored.num_retries, 2);
    assert!(manager.handle_batch().await.unwrap().is_empty());
}

#[tokio::test]
async fn retries_wait_for_backoff() {
    let stores = Stores::new();
    let config = EncodingManagerConfig {
        retry_backoff: Duration::from_secs(3600),
        ..encoding_config()
    };
    let manager = manager(&stores, config, coder_with(Arc::new(FailingBackend)), None);
    let key = stores.queue_blob(4, far_expiry()).await;

    assert_eq!(
        manager.handle_batch().await.unwrap(),
        vec![(key, EncodingOutcome::Retrying)]
    );
    assert_eq!(
        manager.handle_batch().await.unwrap(),
        vec![(key, EncodingOutcome::Deferred)]
    );
    let stored = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
    assert_eq!(stored.status, BlobStatus::Queued);
    assert_eq!(stored.num_retries, 1);
}

#[tokio::test]
async fn expired_and_missing_blobs_fail_without_retry() {
    let stores = Stores::new();
    let manager = manager(&stores, encoding_config(), coder(), None);
    let expired = stores.queue_blob(5, now_secs() - 1).await;
    let missing = stores.queue_without_data(6, far_expiry()).await;

    let mut outcomes = manager.handle_batch().await.unwrap();
    outcomes.sort();
    let mut expected = vec![
        (expired, EncodingOutcome::Failed),
        (missing, EncodingOutcome::Failed),
    ];
    expected.sort();
    assert_eq!(outcomes, expected);
    for key in [expired, missing] {
        let stored = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, BlobStatus::Failed);
        assert_eq!(stored.num_retries, 0);
        assert!(stores.chunks.get_chunk(&key, 0).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn timed_out_encodings_count_against_the_retry_limit() {
    let stores = Stores::new();
    let config = EncodingManagerConfig {
        encoding_request_timeout: Duration::from_millis(50),
        num_encoding_retries: 1,
        ..encoding_config()
    };
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(300)));
    let manager = manager(&stores, config, coder_with(backend), None);
    let key = stores.queue_blob(12, far_expiry()).await;

    assert_eq!(
        manager.handle_batch().await.unwrap(),
        vec![(key, EncodingOutcome::Retrying)]
    );
    let stored = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
    assert_eq!(stored.status, BlobStatus::Queued);
    assert_eq!(stored.num_retries, 1);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(
        manager.handle_batch().await.unwrap(),
        vec![(key, EncodingOutcome::Failed)]
    );
    let stored = stores.metadata.get_blob_metadata(&key).await.unwrap().unwrap();
    assert_eq!(stored.status, BlobStatus::Failed);
    assert_eq!(stored.num_retries, 1);
    assert!(stored.fragment_info.is_none());
}

#[tokio::test]
async fn timed_out_encodings_keep_their_worker() {
    let stores = Stores::new();
    let config = EncodingManagerConfig {
        encoding_request_timeout: Duration::from_millis(50),
        ..encoding_config()
    };
    let backend = Arc::new(SlowBackend::new(Duration::from_millis(200)));
    let manager = manager_with_workers(&stores, config, coder_with(backend.clone()), None, 1);
    for seed in 20..23 {
        stores.queue_blob(seed, far_expiry()).await;
    }

    let outcomes = manager.handle_batch().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| *outcome == EncodingOutcome::Retrying));
    assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
    assert_eq!(backend.running.load(Ordering::SeqCst), 0);
}
