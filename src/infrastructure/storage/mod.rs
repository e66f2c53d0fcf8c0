use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::path::Path;

pub mod multipart;
pub mod s3;

/// A readable object body, streamed.
pub struct ObjectBody {
    pub content_length: Option<i64>,
    pub stream: BoxStream<'static, std::io::Result<Bytes>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads a local file, overwriting any object at `key`.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<()>;

    /// `Ok(None)` when no object exists at `key`.
    async fn get(&self, key: &str) -> Result<Option<ObjectBody>>;

    /// Removing an absent object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// A time-limited URL that reads the object without credentials.
    async fn signed_url(&self, key: &str) -> Result<String>;
}
