// std
use std::io::ErrorKind;
use std::path::PathBuf;
// crates
use async_trait::async_trait;
use bytes::Bytes;
use qda_core::BlobKey;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
// internal
use super::{ChunkStore, ChunkStoreError};

const BLOB_FILE: &str = "blob";

/// Files under `<base>/<hex blob key>/`: the raw blob as `blob` and chunk `i` as `i`.
#[derive(Clone, Debug)]
pub struct FsChunkStore {
    base_dir: PathBuf,
}

impl FsChunkStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path(&self, key: &BlobKey, name: &str) -> PathBuf {
        let mut path = self.base_dir.clone();
        path.push(hex::encode(key.as_bytes()));
        path.push(name);
        path
    }
}

async fn load(path: PathBuf) -> Result<Option<Bytes>, ChunkStoreError> {
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            tracing::error!("Failed to open {}: {e}", path.display());
            return Err(e.into());
        }
    };
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(Some(Bytes::from(contents)))
}

async fn write(path: PathBuf, data: &[u8]) -> Result<(), ChunkStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        // chunks are content addressed, a rewrite stores the same bytes
        .truncate(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn put_blob(&self, key: &BlobKey, data: Bytes) -> Result<(), ChunkStoreError> {
        write(self.path(key, BLOB_FILE), &data).await
    }

    async fn get_blob(&self, key: &BlobKey) -> Result<Option<Bytes>, ChunkStoreError> {
        load(self.path(key, BLOB_FILE)).await
    }

    async fn put_chunk(
        &self,
        key: &BlobKey,
        index: u32,
        data: Bytes,
    ) -> Result<(), ChunkStoreError> {
        write(self.path(key, &index.to_string()), &data).await
    }

    async fn get_chunk(
        &self,
        key: &BlobKey,
        index: u32,
    ) -> Result<Option<Bytes>, ChunkStoreError> {
        load(self.path(key, &index.to_string())).await
    }
}
