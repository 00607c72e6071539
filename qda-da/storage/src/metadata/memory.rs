// std
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
// crates
use async_trait::async_trait;
use qda_core::metadata::now_nanos;
use qda_core::{
    Attestation, BatchHeader, BlobCertificate, BlobInclusionInfo, BlobKey, BlobMetadata,
    BlobStatus,
};
use tokio::sync::Mutex;
use tracing::trace;
// internal
use super::{
    MetadataStore, MetadataStoreError, ScanDirection, StatusCursor, StatusPage, StatusTransition,
};

type IndexKey = (BlobStatus, u64, BlobKey);

#[derive(Default)]
struct Tables {
    blobs: HashMap<BlobKey, BlobMetadata>,
    status_index: BTreeSet<IndexKey>,
    certificates: HashMap<BlobKey, BlobCertificate>,
    batch_headers: HashMap<[u8; 32], BatchHeader>,
    inclusions: HashMap<BlobKey, ([u8; 32], BlobInclusionInfo)>,
    attestations: HashMap<[u8; 32], Attestation>,
}

impl Tables {
    fn index_key(metadata: &BlobMetadata, key: BlobKey) -> IndexKey {
        (metadata.status, metadata.updated_at, key)
    }
}

/// Process local [`MetadataStore`]. A single lock guards every table so compare and write happen
/// atomically.
#[derive(Default)]
pub struct MemoryMetadataStore {
    tables: Mutex<Tables>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.lock().await.blobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn put_blob_metadata(&self, metadata: BlobMetadata) -> Result<(), MetadataStoreError> {
        let key = metadata.blob_key();
        let mut tables = self.tables.lock().await;
        if tables.blobs.contains_key(&key) {
            return Err(MetadataStoreError::AlreadyExists(format!("Blob {key}")));
        }
        tables.status_index.insert(Tables::index_key(&metadata, key));
        tables.blobs.insert(key, metadata);
        Ok(())
    }

    async fn get_blob_metadata(
        &self,
        key: &BlobKey,
    ) -> Result<Option<BlobMetadata>, MetadataStoreError> {
        Ok(self.tables.lock().await.blobs.get(key).cloned())
    }

    async fn compare_and_transition(
        &self,
        key: &BlobKey,
        expected: BlobStatus,
        transition: StatusTransition,
    ) -> Result<BlobMetadata, MetadataStoreError> {
        let mut tables = self.tables.lock().await;
        let Tables {
            blobs,
            status_index,
            ..
        } = &mut *tables;
        let metadata = blobs
            .get_mut(key)
            .ok_or(MetadataStoreError::NotFound(*key))?;
        if metadata.status != expected {
            return Err(MetadataStoreError::ConditionFailed {
                key: *key,
                expected,
                actual: metadata.status,
            });
        }
        if !expected.can_transition_to(transition.status) {
            return Err(MetadataStoreError::InvalidTransition {
                key: *key,
                from: expected,
                to: transition.status,
            });
        }
        status_index.remove(&Tables::index_key(metadata, *key));
        metadata.status = transition.status;
        // strictly increasing so a cursor never skips or repeats the updated blob
        metadata.updated_at = now_nanos().max(metadata.updated_at + 1);
        if transition.bump_retries {
            metadata.num_retries += 1;
        }
        if let Some(fragment_info) = transition.fragment_info {
            metadata.fragment_info = Some(fragment_info);
        }
        status_index.insert(Tables::index_key(metadata, *key));
        trace!(blob_key = %key, from = %expected, to = %transition.status, "Status transition");
        Ok(metadata.clone())
    }

    async fn query_by_status(
        &self,
        status: BlobStatus,
        cursor: Option<StatusCursor>,
        limit: usize,
        direction: ScanDirection,
    ) -> Result<StatusPage, MetadataStoreError> {
        let tables = self.tables.lock().await;
        let lowest = (status, 0, BlobKey::default());
        let highest = (status, u64::MAX, BlobKey([0xff; 32]));
        let cursor = cursor.map(|cursor| (status, cursor.updated_at, cursor.blob_key));
        let range = match (direction, cursor) {
            (ScanDirection::Forward, Some(cursor)) => {
                (Bound::Excluded(cursor), Bound::Included(highest))
            }
            (ScanDirection::Backward, Some(cursor)) => {
                (Bound::Included(lowest), Bound::Excluded(cursor))
            }
            (_, None) => (Bound::Included(lowest), Bound::Included(highest)),
        };
        let entries = tables.status_index.range(range);
        let mut keys: Box<dyn Iterator<Item = &IndexKey> + '_> = match direction {
            ScanDirection::Forward => Box::new(entries),
            ScanDirection::Backward => Box::new(entries.rev()),
        };
        let items: Vec<BlobMetadata> = keys
            .by_ref()
            .take(limit)
            .filter_map(|(_, _, key)| tables.blobs.get(key).cloned())
            .collect();
        let next_cursor = match (keys.next(), items.last()) {
            (Some(_), Some(last)) => Some(StatusCursor::from(last)),
            _ => None,
        };
        Ok(StatusPage { items, next_cursor })
    }

    async fn put_blob_certificate(
        &self,
        certificate: BlobCertificate,
    ) -> Result<(), MetadataStoreError> {
        let key = certificate.blob_key();
        let mut tables = self.tables.lock().await;
        if tables.certificates.contains_key(&key) {
            return Err(MetadataStoreError::AlreadyExists(format!(
                "Certificate of blob {key}"
            )));
        }
        tables.certificates.insert(key, certificate);
        Ok(())
    }

    async fn get_blob_certificate(
        &self,
        key: &BlobKey,
    ) -> Result<Option<BlobCertificate>, MetadataStoreError> {
        Ok(self.tables.lock().await.certificates.get(key).cloned())
    }

    async fn put_batch_header(&self, header: BatchHeader) -> Result<(), MetadataStoreError> {
        self.tables
            .lock()
            .await
            .batch_headers
            .insert(header.hash(), header);
        Ok(())
    }

    async fn get_batch_header(
        &self,
        batch_hash: &[u8; 32],
    ) -> Result<Option<BatchHeader>, MetadataStoreError> {
        Ok(self.tables.lock().await.batch_headers.get(batch_hash).copied())
    }

    async fn put_inclusion_info(
        &self,
        batch_hash: [u8; 32],
        info: BlobInclusionInfo,
    ) -> Result<(), MetadataStoreError> {
        let key = info.certificate.blob_key();
        self.tables
            .lock()
            .await
            .inclusions
            .insert(key, (batch_hash, info));
        Ok(())
    }

    async fn get_inclusion_info(
        &self,
        key: &BlobKey,
    ) -> Result<Option<([u8; 32], BlobInclusionInfo)>, MetadataStoreError> {
        Ok(self.tables.lock().await.inclusions.get(key).cloned())
    }

    async fn put_attestation(&self, attestation: Attestation) -> Result<(), MetadataStoreError> {
        let batch_hash = attestation.batch_header.hash();
        let mut tables = self.tables.lock().await;
        if tables.attestations.contains_key(&batch_hash) {
            return Err(MetadataStoreError::AlreadyExists(format!(
                "Attestation of batch {}",
                hex::encode(batch_hash)
            )));
        }
        tables.attestations.insert(batch_hash, attestation);
        Ok(())
    }

    async fn get_attestation(
        &self,
        batch_hash: &[u8; 32],
    ) -> Result<Option<Attestation>, MetadataStoreError> {
        Ok(self.tables.lock().await.attestations.get(batch_hash).cloned())
    }
}

#[cfg(test)]
mod test {
    use super::MemoryMetadataStore;
    use crate::metadata::{
        MetadataStore, MetadataStoreError, ScanDirection, StatusTransition,
    };
    use ark_bls12_381::{G1Affine, G2Affine};
    use ark_ec::AffineRepr;
    use qda_core::{
        BlobCommitments, BlobHeader, BlobMetadata, BlobStatus, FragmentInfo, PaymentMetadata,
    };
    use qda_kzg::{Commitment, LengthCommitment, LengthProof};
    use std::sync::Arc;

    fn metadata(timestamp: i64, requested_at: u64) -> BlobMetadata {
        let header = BlobHeader {
            version: 0,
            quorum_numbers: vec![0],
            commitments: BlobCommitments {
                commitment: Commitment { 0: G1Affine::generator() },
                length_commitment: LengthCommitment(G2Affine::generator()),
                length_proof: LengthProof(G2Affine::generator()),
                length: 4,
            },
            payment: PaymentMetadata {
                account_id: [1; 20],
                timestamp,
                cumulative_payment: 0,
            },
        };
        BlobMetadata::new(header, 128, requested_at, u64::MAX)
    }

    #[tokio::test]
    async fn put_is_not_an_overwrite() {
        let store = MemoryMetadataStore::new();
        store.put_blob_metadata(metadata(1, 1)).await.unwrap();
        assert!(matches!(
            store.put_blob_metadata(metadata(1, 1)).await,
            Err(MetadataStoreError::AlreadyExists(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn transitions_are_conditional() {
        let store = MemoryMetadataStore::new();
        let blob = metadata(1, 1);
        let key = blob.blob_key();
        store.put_blob_metadata(blob).await.unwrap();

        let retried = store
            .compare_and_transition(&key, BlobStatus::Queued, StatusTransition::retry())
            .await
            .unwrap();
        assert_eq!(retried.num_retries, 1);
        assert_eq!(retried.status, BlobStatus::Queued);

        let fragment_info = FragmentInfo {
            total_chunk_size_bytes: 1024,
            fragment_size_bytes: 64,
        };
        let encoded = store
            .compare_and_transition(
                &key,
                BlobStatus::Queued,
                StatusTransition::to(BlobStatus::Encoded).with_fragment_info(fragment_info),
            )
            .await
            .unwrap();
        assert_eq!(encoded.fragment_info, Some(fragment_info));
        assert!(encoded.updated_at > retried.updated_at);

        assert_eq!(
            store
                .compare_and_transition(
                    &key,
                    BlobStatus::Queued,
                    StatusTransition::to(BlobStatus::Encoded)
                )
                .await,
            Err(MetadataStoreError::ConditionFailed {
                key,
                expected: BlobStatus::Queued,
                actual: BlobStatus::Encoded
            })
        );
        assert_eq!(
            store
                .compare_and_transition(
                    &key,
                    BlobStatus::Encoded,
                    StatusTransition::to(BlobStatus::Complete)
                )
                .await,
            Err(MetadataStoreError::InvalidTransition {
                key,
                from: BlobStatus::Encoded,
                to: BlobStatus::Complete
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_transitions_have_one_winner() {
        let store = Arc::new(MemoryMetadataStore::new());
        let blob = metadata(1, 1);
        let key = blob.blob_key();
        store.put_blob_metadata(blob).await.unwrap();
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .compare_and_transition(
                            &key,
                            BlobStatus::Queued,
                            StatusTransition::to(BlobStatus::Encoded),
                        )
                        .await
                })
            })
            .collect();
        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn query_pages_oldest_first() {
        let store = MemoryMetadataStore::new();
        for i in 0..5 {
            store.put_blob_metadata(metadata(i, 10 + i as u64)).await.unwrap();
        }
        let first = store
            .query_by_status(BlobStatus::Queued, None, 2, ScanDirection::Forward)
            .await
            .unwrap();
        assert_eq!(
            first.items.iter().map(|m| m.requested_at).collect::<Vec<_>>(),
            vec![10, 11]
        );
        let second = store
            .query_by_status(
                BlobStatus::Queued,
                first.next_cursor,
                2,
                ScanDirection::Forward,
            )
            .await
            .unwrap();
        assert_eq!(
            second.items.iter().map(|m| m.requested_at).collect::<Vec<_>>(),
            vec![12, 13]
        );
        let last = store
            .query_by_status(
                BlobStatus::Queued,
                second.next_cursor,
                2,
                ScanDirection::Forward,
            )
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_cursor, None);

        let newest = store
            .query_by_status(BlobStatus::Queued, None, 1, ScanDirection::Backward)
            .await
            .unwrap();
        assert_eq!(newest.items[0].requested_at, 14);
        let before = store
            .query_by_status(
                BlobStatus::Queued,
                newest.next_cursor,
                10,
                ScanDirection::Backward,
            )
            .await
            .unwrap();
        assert_eq!(
            before.items.iter().map(|m| m.requested_at).collect::<Vec<_>>(),
            vec![13, 12, 11, 10]
        );

        assert!(store
            .query_by_status(BlobStatus::Encoded, None, 10, ScanDirection::Forward)
            .await
            .unwrap()
            .items
            .is_empty());
    }
}
