//! Knowledge Retrieval Client
//!
//! Wraps a managed retrieve-and-generate service. The service answers the
//! question from indexed documents and returns its own citations; this client
//! renumbers them against the known-document directory, backfills markers
//! when the service returned none, and builds the final reference list.

mod citations;
mod directory;
#[cfg(feature = "aws")]
mod bedrock;

pub use citations::{
    backfill_markers, build_references, has_markers, referenced_numbers, renumber_markers,
    truncate_excerpt, CitationNumbering, EXCERPT_MAX_CHARS,
};
pub use directory::{
    DocumentDirectory, KnownDocument, LocalDocumentDirectory, StaticDocumentDirectory,
};
#[cfg(feature = "aws")]
pub use bedrock::{BedrockKnowledgeService, S3DocumentDirectory};

use crate::config::KnowledgeConfig;
use crate::errors::{AppError, Result};
use crate::metrics::{self, QueryTimer};
use crate::types::{OrchestrationResult, SourceLocation};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How the service searches the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Semantic and keyword search combined
    Hybrid,
    Semantic,
}

/// Retrieval configuration sent with every call
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub search_mode: SearchMode,
    /// Passages retrieved before reranking
    pub top_k: u32,
    /// Reranking model, if reranking is enabled
    pub rerank_model: Option<String>,
    /// Let the service split compound questions into sub-questions
    pub query_decomposition: bool,
}

impl RetrievalSettings {
    pub const DEFAULT_TOP_K: u32 = 10;

    pub fn from_config(config: &KnowledgeConfig) -> Self {
        Self {
            rerank_model: config.rerank_model_arn.clone(),
            ..Self::default()
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            search_mode: SearchMode::Hybrid,
            top_k: Self::DEFAULT_TOP_K,
            rerank_model: None,
            query_decomposition: true,
        }
    }
}

/// Generation parameters for retrieval-grounded answers
///
/// Fixed, and lower temperature than the orchestration calls so answers
/// stay close to the retrieved passages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl GenerationSettings {
    pub const GROUNDED: GenerationSettings = GenerationSettings {
        temperature: 0.1,
        top_p: 0.9,
        max_tokens: 2048,
    };
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::GROUNDED
    }
}

/// A citation as numbered by the service (1-based, retrieval order)
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCitation {
    pub number: usize,
    pub title: String,
    pub filename: String,
    pub content: String,
    pub location: SourceLocation,
}

/// Raw service output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub answer: String,
    pub citations: Vec<ProviderCitation>,
    pub session_id: Option<String>,
}

/// Managed retrieve-and-generate backend
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    async fn retrieve_and_generate(
        &self,
        question: &str,
        session_id: Option<&str>,
        retrieval: &RetrievalSettings,
        generation: &GenerationSettings,
    ) -> Result<ProviderResponse>;
}

/// Last path segment of a URI or object key
pub fn filename_from_uri(uri: &str) -> String {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri)
        .to_string()
}

/// Per-call usage figures
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeUsage {
    pub duration_secs: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub citations: usize,
}

impl KnowledgeUsage {
    /// Rough token estimate (4 characters per token)
    pub fn estimate(question: &str, answer: &str, duration_secs: f64, citations: usize) -> Self {
        Self {
            duration_secs,
            input_tokens: estimate_tokens(question),
            output_tokens: estimate_tokens(answer),
            citations,
        }
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Sink for per-call telemetry
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, usage: KnowledgeUsage) -> Result<()>;
}

/// Records usage into the metrics registry
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsUsageRecorder;

#[async_trait]
impl UsageRecorder for MetricsUsageRecorder {
    async fn record(&self, usage: KnowledgeUsage) -> Result<()> {
        metrics::record_knowledge_call(usage.duration_secs, usage.input_tokens, usage.output_tokens);
        Ok(())
    }
}

/// Create a knowledge client based on configuration
pub async fn create_client(config: &KnowledgeConfig) -> Result<KnowledgeClient> {
    match config.provider.as_str() {
        "none" => Ok(KnowledgeClient::unconfigured()),
        #[cfg(feature = "aws")]
        "bedrock" => {
            let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let service = BedrockKnowledgeService::new(
                aws_sdk_bedrockagentruntime::Client::new(&aws),
                config,
            )?;

            let directory: Arc<dyn DocumentDirectory> =
                match (&config.documents_dir, &config.documents_bucket) {
                    (Some(dir), _) => Arc::new(LocalDocumentDirectory::new(dir)),
                    (None, Some(bucket)) => Arc::new(S3DocumentDirectory::new(
                        aws_sdk_s3::Client::new(&aws),
                        bucket,
                        &config.documents_prefix,
                    )),
                    (None, None) => Arc::new(StaticDocumentDirectory::default()),
                };

            Ok(KnowledgeClient::new(Arc::new(service), directory)
                .with_retrieval(RetrievalSettings::from_config(config)))
        }
        #[cfg(not(feature = "aws"))]
        "bedrock" => Err(AppError::Configuration {
            message: "knowledge provider 'bedrock' requires the `aws` feature".to_string(),
        }),
        other => Err(AppError::Configuration {
            message: format!("unknown knowledge provider '{}'", other),
        }),
    }
}

/// Client answering questions from the knowledge source
pub struct KnowledgeClient {
    service: Option<Arc<dyn KnowledgeService>>,
    directory: Arc<dyn DocumentDirectory>,
    recorder: Arc<dyn UsageRecorder>,
    retrieval: RetrievalSettings,
    generation: GenerationSettings,
}

impl KnowledgeClient {
    pub fn new(service: Arc<dyn KnowledgeService>, directory: Arc<dyn DocumentDirectory>) -> Self {
        Self {
            service: Some(service),
            directory,
            recorder: Arc::new(MetricsUsageRecorder),
            retrieval: RetrievalSettings::default(),
            generation: GenerationSettings::GROUNDED,
        }
    }

    /// Client with no knowledge source; every query is a configuration error
    pub fn unconfigured() -> Self {
        Self {
            service: None,
            directory: Arc::new(StaticDocumentDirectory::default()),
            recorder: Arc::new(MetricsUsageRecorder),
            retrieval: RetrievalSettings::default(),
            generation: GenerationSettings::GROUNDED,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalSettings) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    /// Answer a question from the knowledge source
    ///
    /// # Errors
    /// `Configuration` when no service is configured, `KnowledgeService` (or
    /// whatever the service raised) when the call fails.
    pub async fn query(&self, question: &str, session_id: Option<&str>) -> Result<OrchestrationResult> {
        let service = self.service.as_ref().ok_or_else(|| AppError::Configuration {
            message: "no knowledge source is configured".to_string(),
        })?;

        let timer = QueryTimer::start();
        let response = service
            .retrieve_and_generate(question, session_id, &self.retrieval, &self.generation)
            .await?;
        let duration = timer.elapsed_secs();

        debug!(
            provider_citations = response.citations.len(),
            duration_ms = (duration * 1000.0) as u64,
            "Knowledge service answered"
        );

        let documents = match self.directory.list_documents().await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "Document directory unavailable, numbering by retrieval order");
                Vec::new()
            }
        };

        let numbering = CitationNumbering::build(&documents, &response.citations);
        let mut answer = renumber_markers(&response.answer, &numbering);

        if !has_markers(&answer) && !numbering.is_empty() {
            answer = backfill_markers(&answer, numbering.external_order());
        }

        let citations = build_references(&answer, &numbering, &response.citations);

        self.record_usage(KnowledgeUsage::estimate(question, &answer, duration, citations.len()));

        info!(citations = citations.len(), "Knowledge answer ready");

        Ok(OrchestrationResult {
            answer,
            citations,
            session_id: response.session_id,
        })
    }

    /// Fire-and-forget telemetry write
    fn record_usage(&self, usage: KnowledgeUsage) {
        let recorder = Arc::clone(&self.recorder);
        tokio::spawn(async move {
            if let Err(e) = recorder.record(usage).await {
                warn!(error = %e, "Failed to record knowledge usage");
            }
        });
    }
}
