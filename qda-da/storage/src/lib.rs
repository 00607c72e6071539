pub mod chunks;
pub mod metadata;

pub use chunks::{fs::FsChunkStore, memory::MemoryChunkStore, ChunkStore, ChunkStoreError};
pub use metadata::{
    memory::MemoryMetadataStore, MetadataStore, MetadataStoreError, ScanDirection,
    StatusCursor, StatusPage, StatusTransition,
};
