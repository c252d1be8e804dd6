//! Amazon Bedrock Converse client

use super::{CompletionGateway, CompletionRequest};
use crate::config::CompletionConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, ImageBlock, ImageFormat, ImageSource,
    InferenceConfiguration, Message,
};
use aws_sdk_bedrockruntime::Client;

/// Completion gateway backed by the Bedrock Converse API
pub struct BedrockGateway {
    client: Client,
    model: String,
    vision_model: String,
}

impl BedrockGateway {
    /// Build a client from the ambient AWS configuration
    pub async fn from_env(config: &CompletionConfig) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(Client::new(&aws_config), config)
    }

    /// Create with an existing Bedrock runtime client
    pub fn with_client(client: Client, config: &CompletionConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            vision_model: config.vision_model.clone(),
        }
    }
}

fn completion_error(message: impl Into<String>) -> AppError {
    AppError::Completion {
        message: message.into(),
    }
}

#[async_trait]
impl CompletionGateway for BedrockGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let model = if request.has_images() {
            &self.vision_model
        } else {
            &self.model
        };

        let mut content = Vec::with_capacity(request.images.len() + 1);
        for image in &request.images {
            let format = match image.extension() {
                "png" => ImageFormat::Png,
                "jpg" => ImageFormat::Jpeg,
                "gif" => ImageFormat::Gif,
                "webp" => ImageFormat::Webp,
                _ => {
                    return Err(completion_error(format!(
                        "unsupported image media type '{}'",
                        image.media_type
                    )))
                }
            };
            let block = ImageBlock::builder()
                .format(format)
                .source(ImageSource::Bytes(Blob::new(image.data.clone())))
                .build()
                .map_err(|e| completion_error(e.to_string()))?;
            content.push(ContentBlock::Image(block));
        }
        content.push(ContentBlock::Text(request.prompt));

        let message = Message::builder()
            .role(ConversationRole::User)
            .set_content(Some(content))
            .build()
            .map_err(|e| completion_error(e.to_string()))?;

        let inference = InferenceConfiguration::builder()
            .max_tokens(request.params.max_tokens as i32)
            .temperature(request.params.temperature)
            .top_p(request.params.top_p)
            .build();

        let output = self
            .client
            .converse()
            .model_id(model)
            .messages(message)
            .inference_config(inference)
            .send()
            .await
            .map_err(|e| completion_error(format!("Converse failed: {}", DisplayErrorContext(&e))))?;

        let text = match output.output() {
            Some(ConverseOutput::Message(message)) => message
                .content()
                .iter()
                .filter_map(|block| block.as_text().ok())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        };

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
