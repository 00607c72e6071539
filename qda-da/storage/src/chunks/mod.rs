pub mod fs;
pub mod memory;

// std
// crates
use async_trait::async_trait;
use bytes::Bytes;
use qda_core::{BlobKey, Frame, FrameError};
use thiserror::Error;
// internal

#[derive(Error, Debug)]
pub enum ChunkStoreError {
    #[error("Chunk {index} of blob {key} not found")]
    MissingChunk { key: BlobKey, index: u32 },
    #[error("Stored chunk {index} of blob {key} is corrupted: {source}")]
    Corrupted {
        key: BlobKey,
        index: u32,
        source: FrameError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChunkStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Object storage for raw blobs and their encoded chunks, addressed by `(blob key, index)`.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn put_blob(&self, key: &BlobKey, data: Bytes) -> Result<(), ChunkStoreError>;

    async fn get_blob(&self, key: &BlobKey) -> Result<Option<Bytes>, ChunkStoreError>;

    async fn put_chunk(&self, key: &BlobKey, index: u32, data: Bytes)
        -> Result<(), ChunkStoreError>;

    async fn get_chunk(&self, key: &BlobKey, index: u32)
        -> Result<Option<Bytes>, ChunkStoreError>;

    /// Store every frame of a blob, frame `i` as chunk `i`.
    async fn put_frames(&self, key: &BlobKey, frames: &[Frame]) -> Result<(), ChunkStoreError> {
        for (index, frame) in frames.iter().enumerate() {
            self.put_chunk(key, index as u32, Bytes::from(frame.to_bytes()))
                .await?;
        }
        Ok(())
    }

    async fn get_frames(
        &self,
        key: &BlobKey,
        indices: &[u32],
    ) -> Result<Vec<Frame>, ChunkStoreError> {
        let mut frames = Vec::with_capacity(indices.len());
        for index in indices {
            let bytes = self
                .get_chunk(key, *index)
                .await?
                .ok_or(ChunkStoreError::MissingChunk {
                    key: *key,
                    index: *index,
                })?;
            let frame = Frame::from_bytes(&bytes).map_err(|source| ChunkStoreError::Corrupted {
                key: *key,
                index: *index,
                source,
            })?;
            frames.push(frame);
        }
        Ok(frames)
    }
}
