//! Text completion gateway abstraction
//!
//! Provides a unified interface over the language-model providers used by
//! every component of the query pipeline:
//! - OpenAI-compatible chat completions (text and vision)
//! - Amazon Bedrock Converse (feature `aws`)
//! - A scripted in-process gateway for tests and local development

mod openai;
#[cfg(feature = "aws")]
mod bedrock;

pub use openai::OpenAiGateway;
#[cfg(feature = "aws")]
pub use bedrock::BedrockGateway;

use crate::config::CompletionConfig;
use crate::errors::{AppError, Result};
use crate::types::ImageAttachment;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Sampling parameters for one completion call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl SamplingParams {
    /// Short deterministic replies (classification labels)
    pub const LABEL: SamplingParams = SamplingParams {
        max_tokens: 10,
        temperature: 0.0,
        top_p: 1.0,
    };

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// A single prompt, optionally with reference images
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub images: Vec<ImageAttachment>,
    pub params: SamplingParams,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            params: SamplingParams::default(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Trait for text (and image+text) completion
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Generate text for the prompt
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Get the text model name
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// Scripted gateway for testing
///
/// Rules are checked in insertion order against the prompt; the first rule
/// whose needle is contained in the prompt decides the reply.
pub struct MockGateway {
    rules: Vec<(String, MockReply)>,
    fallback: MockReply,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: MockReply::Text(String::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` when the prompt contains `needle`
    pub fn reply_when(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push((needle.into(), MockReply::Text(text.into())));
        self
    }

    /// Fail with a completion error when the prompt contains `needle`
    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), MockReply::Fail(message.into())));
        self
    }

    /// Reply used when no rule matches
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = MockReply::Text(text.into());
        self
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of calls received so far
    pub fn calls(&self) -> usize {
        self.requests().len()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionGateway for MockGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone());

        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);

        match reply {
            MockReply::Text(text) => Ok(text),
            MockReply::Fail(message) => Err(AppError::Completion { message }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-completion"
    }
}

/// Create a completion gateway based on configuration
pub async fn create_gateway(config: &CompletionConfig) -> Result<Arc<dyn CompletionGateway>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGateway::new(config)?)),
        #[cfg(feature = "aws")]
        "bedrock" => Ok(Arc::new(BedrockGateway::from_env(config).await)),
        #[cfg(not(feature = "aws"))]
        "bedrock" => Err(AppError::Configuration {
            message: "completion provider 'bedrock' requires the `aws` feature".to_string(),
        }),
        other => Err(AppError::Configuration {
            message: format!("unknown completion provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_first_matching_rule_wins() {
        let gateway = MockGateway::new()
            .reply_when("Classify", "STRUCTURED")
            .reply_when("Classify the question", "UNSTRUCTURED")
            .with_fallback("fallback");

        let label = gateway
            .complete(CompletionRequest::new("Classify the question: how many?"))
            .await
            .unwrap();
        let other = gateway.complete(CompletionRequest::new("Merge")).await.unwrap();

        assert_eq!(label, "STRUCTURED");
        assert_eq!(other, "fallback");
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_failure_is_completion_error() {
        let gateway = MockGateway::new().fail_when("boom", "provider down");
        let err = gateway
            .complete(CompletionRequest::new("boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Completion { .. }));
        assert_eq!(gateway.requests()[0].prompt, "boom");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_configuration_error() {
        let config = CompletionConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        let result = create_gateway(&config).await;
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_sampling_from_config() {
        let params = SamplingParams::from_config(&CompletionConfig::default());
        assert_eq!(params, SamplingParams::default());
        assert_eq!(SamplingParams::LABEL.temperature, 0.0);
    }
}
