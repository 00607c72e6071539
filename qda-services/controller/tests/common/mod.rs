#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blst::min_sig::{PublicKey, SecretKey, Signature};
use bytes::Bytes;
use qda_controller::{
    verify_request_signature, ChainStateProvider, DispatcherConfig, EncodingManagerConfig,
    NodeTransport, OperatorStateCache, StaticChainState, StoreChunksRequest, TransportError,
};
use qda_core::{
    now_nanos, now_secs, BlobHeader, BlobKey, BlobMetadata, BlobVersionParameters,
    ChunkAssigner, EncodingParameterResolver, IndexedOperatorState, OperatorId, OperatorInfo,
    OperatorState, PaymentMetadata, QuorumId, BLS_DST,
};
use qda_da_storage::{ChunkStore, MemoryChunkStore, MemoryMetadataStore, MetadataStore};
use qda_encoding::testutils::{random_blob, TEST_SRS};
use qda_encoding::{ChunkProofBackend, ErasureCoder, ProofBackendKind, ShardValidator};
use qda_utils::WorkerPool;

pub const QUORUM: QuorumId = 0;
pub const HEAD_BLOCK: u64 = 100;
pub const FINALIZATION_DELAY: u64 = 10;

pub fn resolver() -> EncodingParameterResolver {
    // 8 symbol blobs: 16 chunks of 4 evaluations
    EncodingParameterResolver::new(
        BTreeMap::from([(
            0,
            BlobVersionParameters {
                coding_rate: 8,
                max_num_operators: 8,
                num_chunks: 16,
            },
        )]),
        64,
    )
}

pub fn coder() -> ErasureCoder {
    coder_with(ProofBackendKind::Fk20.build(TEST_SRS.clone()))
}

pub fn coder_with(backend: Arc<dyn ChunkProofBackend>) -> ErasureCoder {
    ErasureCoder::new(TEST_SRS.clone(), backend)
}

pub fn encoding_config() -> EncodingManagerConfig {
    EncodingManagerConfig {
        pull_interval: Duration::from_millis(20),
        encoding_request_timeout: Duration::from_secs(30),
        store_timeout: Duration::from_secs(5),
        num_encoding_retries: 3,
        num_concurrent_requests: 4,
        max_num_blobs_per_iteration: 16,
        num_relay_assignment: 2,
        available_relays: vec![0, 1, 2],
        retry_backoff: Duration::from_millis(1),
        proof_backend: ProofBackendKind::Fk20,
    }
}

pub fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        pull_interval: Duration::from_millis(20),
        finalization_block_delay: FINALIZATION_DELAY,
        attestation_timeout: Duration::from_secs(5),
        batch_attestation_timeout: Duration::from_secs(10),
        signature_tick_interval: Duration::from_millis(10),
        num_request_retries: 1,
        num_concurrent_requests: 8,
        max_batch_size: 16,
        significant_signing_threshold_percentage: 80,
        default_confirmation_threshold: 55,
        quorum_confirmation_thresholds: BTreeMap::new(),
        disperser_id: 1,
    }
}

pub struct Operator {
    pub secret: SecretKey,
    pub public_key: PublicKey,
    pub id: OperatorId,
    pub stake: u128,
}

pub fn operators(stakes: &[u128]) -> Vec<Operator> {
    stakes
        .iter()
        .enumerate()
        .map(|(i, stake)| {
            let secret = SecretKey::key_gen(&[i as u8 + 1; 32], &[]).unwrap();
            let public_key = secret.sk_to_pk();
            Operator {
                id: OperatorId::from_public_key(&public_key),
                secret,
                public_key,
                stake: *stake,
            }
        })
        .collect()
}

pub fn operator_state(operators: &[Operator]) -> IndexedOperatorState {
    let members = operators
        .iter()
        .enumerate()
        .map(|(i, operator)| {
            (
                operator.id,
                OperatorInfo {
                    stake: operator.stake,
                    socket: format!("node-{i}:32005"),
                },
            )
        })
        .collect();
    IndexedOperatorState::new(
        OperatorState {
            operators: BTreeMap::from([(QUORUM, members)]),
            block_number: 0,
        },
        operators
            .iter()
            .map(|operator| (operator.id, operator.public_key))
            .collect(),
    )
}

pub fn state_cache(state: IndexedOperatorState) -> Arc<OperatorStateCache> {
    let provider: Arc<dyn ChainStateProvider> =
        Arc::new(StaticChainState::new(state, HEAD_BLOCK));
    Arc::new(OperatorStateCache::new(provider, FINALIZATION_DELAY, [QUORUM]))
}

pub struct Stores {
    pub metadata: Arc<MemoryMetadataStore>,
    pub chunks: Arc<MemoryChunkStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(MemoryMetadataStore::new()),
            chunks: Arc::new(MemoryChunkStore::new()),
        }
    }

    /// Store the data of a fresh 8 symbol blob and queue it.
    pub async fn queue_blob(&self, seed: u64, expiry: u64) -> BlobKey {
        let data = random_blob(8, seed);
        let key = self.queue_header(&data, seed, expiry).await;
        self.chunks.put_blob(&key, Bytes::from(data)).await.unwrap();
        key
    }

    /// Queue a blob whose data never made it to chunk storage.
    pub async fn queue_without_data(&self, seed: u64, expiry: u64) -> BlobKey {
        self.queue_header(&random_blob(8, seed), seed, expiry).await
    }

    async fn queue_header(&self, data: &[u8], seed: u64, expiry: u64) -> BlobKey {
        let header = BlobHeader {
            version: 0,
            quorum_numbers: vec![QUORUM],
            commitments: coder().commit(data).unwrap(),
            payment: PaymentMetadata {
                timestamp: seed as i64,
                ..Default::default()
            },
        };
        let key = header.blob_key();
        self.metadata
            .put_blob_metadata(BlobMetadata::new(
                header,
                data.len() as u64,
                now_nanos(),
                expiry,
            ))
            .await
            .unwrap();
        key
    }

    pub async fn status(&self, key: &BlobKey) -> qda_core::BlobStatus {
        self.metadata
            .get_blob_metadata(key)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

pub fn far_expiry() -> u64 {
    now_secs() + 3600
}

pub enum Behavior {
    Sign,
    /// Never answers.
    Hang,
    /// Unreachable on the first attempt, then signs.
    FailOnce,
    /// Signs with a key other than its registered one.
    WrongKey,
}

struct MockNode {
    secret: SecretKey,
    behavior: Behavior,
    failed: AtomicBool,
    validator: ShardValidator,
}

/// Operators that validate their shards like a real node and answer with a BLS signature over
/// the batch header.
pub struct MockTransport {
    nodes: BTreeMap<OperatorId, MockNode>,
    state: OperatorState,
    disperser: Option<PublicKey>,
    pub requests: AtomicUsize,
}

impl MockTransport {
    pub fn new(
        operators: Vec<Operator>,
        behaviors: Vec<Behavior>,
        state: &IndexedOperatorState,
        disperser: Option<PublicKey>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(4, 16));
        let nodes = operators
            .into_iter()
            .zip(behaviors)
            .map(|(operator, behavior)| {
                let validator = ShardValidator::new(
                    operator.id,
                    TEST_SRS.clone(),
                    resolver(),
                    ChunkAssigner::new(55),
                    pool.clone(),
                );
                (
                    operator.id,
                    MockNode {
                        secret: operator.secret,
                        behavior,
                        failed: AtomicBool::new(false),
                        validator,
                    },
                )
            })
            .collect();
        Self {
            nodes,
            state: state.state.clone(),
            disperser,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeTransport for MockTransport {
    async fn send_chunks(
        &self,
        operator: &OperatorId,
        _socket: &str,
        request: &StoreChunksRequest,
        _timeout: Duration,
    ) -> Result<Signature, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let node = self
            .nodes
            .get(operator)
            .ok_or_else(|| TransportError::Unreachable(operator.to_string()))?;
        match node.behavior {
            Behavior::Hang => futures::future::pending::<()>().await,
            Behavior::FailOnce if !node.failed.swap(true, Ordering::SeqCst) => {
                return Err(TransportError::Unreachable("connection reset".to_string()));
            }
            _ => {}
        }
        if let Some(disperser) = &self.disperser {
            if !verify_request_signature(request, disperser) {
                return Err(TransportError::Rejected("bad request signature".to_string()));
            }
        }
        node.validator
            .validate_blobs(request.shards.clone(), &self.state)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let message = request.batch_header.hash();
        Ok(match node.behavior {
            Behavior::WrongKey => SecretKey::key_gen(&[99; 32], &[])
                .unwrap()
                .sign(&message, BLS_DST, &[]),
            _ => node.secret.sign(&message, BLS_DST, &[]),
        })
    }
}
