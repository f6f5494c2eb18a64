use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::path::Path;
use std::pin::Pin;

pub mod s3;

/// Body of an object, yielded chunk by chunk.
pub type ObjectStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage request failed: {0}")]
    Request(String),
}

/// Durable blob storage keyed by path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<ObjectStream, StorageError>;

    /// Uploads the file at `path`, streaming it from disk.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StorageError>;

    /// Removing a key that does not exist succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
