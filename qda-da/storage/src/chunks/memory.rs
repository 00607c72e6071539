// std
use std::collections::HashMap;
// crates
use async_trait::async_trait;
use bytes::Bytes;
use qda_core::BlobKey;
use tokio::sync::RwLock;
// internal
use super::{ChunkStore, ChunkStoreError};

#[derive(Default)]
pub struct MemoryChunkStore {
    blobs: RwLock<HashMap<BlobKey, Bytes>>,
    chunks: RwLock<HashMap<(BlobKey, u32), Bytes>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn num_chunks(&self, key: &BlobKey) -> usize {
        self.chunks
            .read()
            .await
            .keys()
            .filter(|(blob, _)| blob == key)
            .count()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn put_blob(&self, key: &BlobKey, data: Bytes) -> Result<(), ChunkStoreError> {
        self.blobs.write().await.insert(*key, data);
        Ok(())
    }

    async fn get_blob(&self, key: &BlobKey) -> Result<Option<Bytes>, ChunkStoreError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put_chunk(
        &self,
        key: &BlobKey,
        index: u32,
        data: Bytes,
    ) -> Result<(), ChunkStoreError> {
        self.chunks.write().await.insert((*key, index), data);
        Ok(())
    }

    async fn get_chunk(
        &self,
        key: &BlobKey,
        index: u32,
    ) -> Result<Option<Bytes>, ChunkStoreError> {
        Ok(self.chunks.read().await.get(&(*key, index)).cloned())
    }
}
