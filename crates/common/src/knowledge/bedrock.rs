//! Bedrock knowledge base adapters
//!
//! - `BedrockKnowledgeService`: RetrieveAndGenerate against a knowledge base
//! - `S3DocumentDirectory`: lists the documents bucket the knowledge base indexes

use super::{
    filename_from_uri, DocumentDirectory, GenerationSettings, KnownDocument, KnowledgeService,
    ProviderCitation, ProviderResponse, RetrievalSettings, SearchMode,
};
use crate::config::KnowledgeConfig;
use crate::errors::{AppError, Result};
use crate::types::SourceLocation;
use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::error::DisplayErrorContext;
use aws_sdk_bedrockagentruntime::types::{
    GenerationConfiguration, InferenceConfig, KnowledgeBaseRetrievalConfiguration,
    KnowledgeBaseRetrieveAndGenerateConfiguration, KnowledgeBaseVectorSearchConfiguration,
    OrchestrationConfiguration, QueryTransformationConfiguration, QueryTransformationType,
    RetrieveAndGenerateConfiguration, RetrieveAndGenerateInput, RetrieveAndGenerateType,
    SearchType, TextInferenceConfig, VectorSearchBedrockRerankingConfiguration,
    VectorSearchBedrockRerankingModelConfiguration, VectorSearchRerankingConfiguration,
    VectorSearchRerankingConfigurationType,
};
use aws_sdk_bedrockagentruntime::Client as AgentRuntimeClient;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};

fn service_error(message: impl Into<String>) -> AppError {
    AppError::KnowledgeService {
        message: message.into(),
    }
}

fn required(value: &Option<String>, key: &str) -> Result<String> {
    value.clone().ok_or_else(|| AppError::Configuration {
        message: format!("knowledge.{} is required for the bedrock provider", key),
    })
}

/// Knowledge service backed by a Bedrock knowledge base
pub struct BedrockKnowledgeService {
    client: AgentRuntimeClient,
    knowledge_base_id: String,
    model_arn: String,
}

impl BedrockKnowledgeService {
    /// Create with an explicitly constructed client
    pub fn new(client: AgentRuntimeClient, config: &KnowledgeConfig) -> Result<Self> {
        Ok(Self {
            client,
            knowledge_base_id: required(&config.knowledge_base_id, "knowledge_base_id")?,
            model_arn: required(&config.model_arn, "model_arn")?,
        })
    }

    fn retrieval_configuration(
        &self,
        retrieval: &RetrievalSettings,
    ) -> Result<KnowledgeBaseRetrievalConfiguration> {
        let search_type = match retrieval.search_mode {
            SearchMode::Hybrid => SearchType::Hybrid,
            SearchMode::Semantic => SearchType::Semantic,
        };

        let mut vector = KnowledgeBaseVectorSearchConfiguration::builder()
            .number_of_results(retrieval.top_k as i32)
            .override_search_type(search_type);

        if let Some(model_arn) = &retrieval.rerank_model {
            let model = VectorSearchBedrockRerankingModelConfiguration::builder()
                .model_arn(model_arn)
                .build()
                .map_err(|e| service_error(e.to_string()))?;
            let bedrock = VectorSearchBedrockRerankingConfiguration::builder()
                .model_configuration(model)
                .number_of_reranked_results(retrieval.top_k as i32)
                .build();
            let reranking = VectorSearchRerankingConfiguration::builder()
                .r#type(VectorSearchRerankingConfigurationType::BedrockRerankingModel)
                .bedrock_reranking_configuration(bedrock)
                .build()
                .map_err(|e| service_error(e.to_string()))?;
            vector = vector.reranking_configuration(reranking);
        }

        Ok(KnowledgeBaseRetrievalConfiguration::builder()
            .vector_search_configuration(vector.build())
            .build())
    }
}

#[async_trait]
impl KnowledgeService for BedrockKnowledgeService {
    async fn retrieve_and_generate(
        &self,
        question: &str,
        session_id: Option<&str>,
        retrieval: &RetrievalSettings,
        generation: &GenerationSettings,
    ) -> Result<ProviderResponse> {
        let inference = InferenceConfig::builder()
            .text_inference_config(
                TextInferenceConfig::builder()
                    .temperature(generation.temperature)
                    .top_p(generation.top_p)
                    .max_tokens(generation.max_tokens as i32)
                    .build(),
            )
            .build();

        let mut kb_config = KnowledgeBaseRetrieveAndGenerateConfiguration::builder()
            .knowledge_base_id(&self.knowledge_base_id)
            .model_arn(&self.model_arn)
            .retrieval_configuration(self.retrieval_configuration(retrieval)?)
            .generation_configuration(
                GenerationConfiguration::builder()
                    .inference_config(inference)
                    .build(),
            );

        if retrieval.query_decomposition {
            let transformation = QueryTransformationConfiguration::builder()
                .r#type(QueryTransformationType::QueryDecomposition)
                .build()
                .map_err(|e| service_error(e.to_string()))?;
            kb_config = kb_config.orchestration_configuration(
                OrchestrationConfiguration::builder()
                    .query_transformation_configuration(transformation)
                    .build(),
            );
        }

        let configuration = RetrieveAndGenerateConfiguration::builder()
            .r#type(RetrieveAndGenerateType::KnowledgeBase)
            .knowledge_base_configuration(kb_config.build().map_err(|e| service_error(e.to_string()))?)
            .build()
            .map_err(|e| service_error(e.to_string()))?;

        let input = RetrieveAndGenerateInput::builder()
            .text(question)
            .build()
            .map_err(|e| service_error(e.to_string()))?;

        let output = self
            .client
            .retrieve_and_generate()
            .input(input)
            .retrieve_and_generate_configuration(configuration)
            .set_session_id(session_id.map(str::to_string))
            .send()
            .await
            .map_err(|e| service_error(format!("RetrieveAndGenerate failed: {}", DisplayErrorContext(&e))))?;

        let answer = output.output().map(|o| o.text().to_string()).unwrap_or_default();

        // One provider citation per retrieved reference, numbered in order
        let mut citations = Vec::new();
        for citation in output.citations() {
            for reference in citation.retrieved_references() {
                let uri = reference
                    .location()
                    .and_then(|l| l.s3_location())
                    .and_then(|s3| s3.uri())
                    .map(str::to_string);
                let filename = uri.as_deref().map(filename_from_uri).unwrap_or_default();
                let content = reference
                    .content()
                    .and_then(|c| c.text())
                    .unwrap_or_default()
                    .to_string();

                citations.push(ProviderCitation {
                    number: citations.len() + 1,
                    title: String::new(),
                    filename,
                    content,
                    location: SourceLocation {
                        uri,
                        ..Default::default()
                    },
                });
            }
        }

        Ok(ProviderResponse {
            answer,
            citations,
            session_id: Some(output.session_id().to_string()),
        })
    }
}

/// Document directory over an S3 prefix, sorted by key name
pub struct S3DocumentDirectory {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3DocumentDirectory {
    pub fn new(client: S3Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl DocumentDirectory for S3DocumentDirectory {
    async fn list_documents(&self) -> Result<Vec<KnownDocument>> {
        let mut documents = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| service_error(format!("ListObjectsV2 failed: {}", DisplayErrorContext(&e))))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue;
                }

                let modified_at = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));

                documents.push(KnownDocument::new(
                    filename_from_uri(key),
                    object.size().unwrap_or_default().max(0) as u64,
                    modified_at,
                ));
            }
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }
}
