use std::sync::Arc;

use bytes::Bytes;

use crate::config::StorageConfig;

mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

/// URL prefix under which the local backend's files are served.
pub const LOCAL_URL_PREFIX: &str = "/uploads";

/// Blob storage for image files, keyed by relative object keys such as
/// `model/<owner>/<id>.jpg`.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    /// `Ok(None)` when the object does not exist.
    async fn get_object(&self, key: &str) -> anyhow::Result<Option<Bytes>>;
    /// Deleting a missing object is not an error.
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    /// URL a client can fetch the object from.
    async fn url_for(&self, key: &str) -> anyhow::Result<String>;
}

pub async fn from_config(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn StorageClient>> {
    let storage: Arc<dyn StorageClient> = match cfg {
        StorageConfig::Local { dir } => Arc::new(LocalStorage::new(dir, LOCAL_URL_PREFIX)),
        StorageConfig::S3 {
            endpoint,
            bucket,
            access_key,
            secret_key,
            region,
        } => Arc::new(S3Storage::new(endpoint, bucket, access_key, secret_key, region).await?),
    };
    Ok(storage)
}
