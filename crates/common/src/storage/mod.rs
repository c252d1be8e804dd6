//! Background sinks for the image path
//!
//! Images sent with a question are archived to object storage and the
//! knowledge source is asked to re-sync, so later questions can retrieve
//! what the image contained. Neither sink is ever on the response path.

#[cfg(feature = "aws")]
mod s3;

#[cfg(feature = "aws")]
pub use s3::{BedrockIngestionSync, S3ObjectStore};

use crate::config::{KnowledgeConfig, StorageConfig};
use crate::errors::{AppError, Result};
use crate::types::ImageAttachment;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Long-term object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, returning the stored location
    async fn put(&self, key: &str, data: Vec<u8>, media_type: &str) -> Result<String>;
}

/// Trigger for re-indexing the knowledge source
#[async_trait]
pub trait KnowledgeSync: Send + Sync {
    /// Start a sync, returning the provider's job id if it has one
    async fn start_sync(&self) -> Result<Option<String>>;
}

/// Content-addressed key for an image: `{prefix}/{sha256}.{ext}`
pub fn image_key(prefix: &str, image: &ImageAttachment) -> String {
    let digest = hex::encode(Sha256::digest(&image.data));
    let prefix = prefix.trim_matches('/');

    if prefix.is_empty() {
        format!("{}.{}", digest, image.extension())
    } else {
        format!("{}/{}.{}", prefix, digest, image.extension())
    }
}

/// Object store over a local directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if key.is_empty() || !safe {
            return Err(AppError::ObjectStore {
                message: format!("invalid object key '{}'", key),
            });
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, media_type: &str) -> Result<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, &data).await?;
        debug!(path = %path.display(), media_type, bytes = data.len(), "Stored object");

        Ok(path.display().to_string())
    }
}

/// Sync trigger for knowledge sources that index on their own
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSync;

#[async_trait]
impl KnowledgeSync for NoopSync {
    async fn start_sync(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Create the image object store; `None` disables archiving
pub async fn create_object_store(config: &StorageConfig) -> Result<Option<Arc<dyn ObjectStore>>> {
    match config.provider.as_str() {
        "none" => Ok(None),
        "local" => Ok(Some(Arc::new(LocalObjectStore::new(&config.root)))),
        #[cfg(feature = "aws")]
        "s3" => {
            let bucket = config.bucket.clone().ok_or_else(|| AppError::Configuration {
                message: "storage.bucket is required for the s3 provider".to_string(),
            })?;
            let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Ok(Some(Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws), bucket))))
        }
        #[cfg(not(feature = "aws"))]
        "s3" => Err(AppError::Configuration {
            message: "storage provider 's3' requires the `aws` feature".to_string(),
        }),
        other => Err(AppError::Configuration {
            message: format!("unknown storage provider '{}'", other),
        }),
    }
}

/// Create the sync trigger for the configured knowledge source
pub async fn create_sync(config: &KnowledgeConfig) -> Result<Arc<dyn KnowledgeSync>> {
    match (config.provider.as_str(), &config.data_source_id) {
        #[cfg(feature = "aws")]
        ("bedrock", Some(_)) => {
            let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Ok(Arc::new(BedrockIngestionSync::new(
                aws_sdk_bedrockagent::Client::new(&aws),
                config,
            )?))
        }
        _ => Ok(Arc::new(NoopSync)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_key_is_content_addressed() {
        let image = ImageAttachment::new(b"abc".to_vec(), "image/png");
        assert_eq!(
            image_key("images/", &image),
            "images/ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.png"
        );

        let same = ImageAttachment::new(b"abc".to_vec(), "image/png");
        assert_eq!(image_key("images", &image), image_key("images", &same));
        assert!(!image_key("", &image).contains('/'));
    }

    #[tokio::test]
    async fn test_local_store_writes_nested_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let location = store.put("images/a.png", vec![1, 2, 3], "image/png").await.unwrap();

        assert!(location.ends_with("a.png"));
        assert_eq!(std::fs::read(dir.path().join("images/a.png")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        tokio_test::assert_err!(store.put("../evil.png", vec![], "image/png").await);
        tokio_test::assert_err!(store.put("/abs.png", vec![], "image/png").await);
        tokio_test::assert_err!(store.put("", vec![], "image/png").await);
    }

    #[tokio::test]
    async fn test_create_object_store_providers() {
        let mut config = StorageConfig::default();
        assert!(create_object_store(&config).await.unwrap().is_some());

        config.provider = "none".to_string();
        assert!(create_object_store(&config).await.unwrap().is_none());

        config.provider = "ftp".to_string();
        assert!(create_object_store(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_noop_sync() {
        let job = tokio_test::assert_ok!(NoopSync.start_sync().await);
        assert_eq!(job, None);
    }
}
