//! S3 object store and Bedrock knowledge base ingestion trigger

use super::{KnowledgeSync, ObjectStore};
use crate::config::KnowledgeConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_bedrockagent::Client as AgentClient;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::info;

/// Object store backed by an S3 bucket
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, media_type: &str) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(media_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| AppError::ObjectStore {
                message: format!("PutObject failed: {}", DisplayErrorContext(&e)),
            })?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}

/// Starts an ingestion job on a Bedrock knowledge base data source
pub struct BedrockIngestionSync {
    client: AgentClient,
    knowledge_base_id: String,
    data_source_id: String,
}

impl BedrockIngestionSync {
    pub fn new(client: AgentClient, config: &KnowledgeConfig) -> Result<Self> {
        let missing = |key: &str| AppError::Configuration {
            message: format!("knowledge.{} is required for ingestion sync", key),
        };

        Ok(Self {
            client,
            knowledge_base_id: config
                .knowledge_base_id
                .clone()
                .ok_or_else(|| missing("knowledge_base_id"))?,
            data_source_id: config
                .data_source_id
                .clone()
                .ok_or_else(|| missing("data_source_id"))?,
        })
    }
}

#[async_trait]
impl KnowledgeSync for BedrockIngestionSync {
    async fn start_sync(&self) -> Result<Option<String>> {
        let output = self
            .client
            .start_ingestion_job()
            .knowledge_base_id(&self.knowledge_base_id)
            .data_source_id(&self.data_source_id)
            .send()
            .await
            .map_err(|e| AppError::KnowledgeService {
                message: format!("StartIngestionJob failed: {}", DisplayErrorContext(&e)),
            })?;

        let job_id = output.ingestion_job().map(|job| job.ingestion_job_id().to_string());
        info!(job_id = ?job_id, "Started knowledge base ingestion job");

        Ok(job_id)
    }
}
