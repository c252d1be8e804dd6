//! Image fast path
//!
//! One vision completion call answers the question. Archiving the images and
//! re-syncing the knowledge source happen on a detached task that the
//! response never waits for.

use crate::completion::{CompletionGateway, CompletionRequest, SamplingParams};
use crate::errors::Result;
use crate::metrics;
use crate::storage::{image_key, KnowledgeSync, ObjectStore};
use crate::types::{ImageAttachment, OrchestrationResult, Query};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Instruction used when an image arrives without a question
pub const DEFAULT_IMAGE_PROMPT: &str =
    "Describe this image in detail, including any text, figures or data it contains.";

/// Answer used when the vision call yields nothing
pub const IMAGE_APOLOGY: &str =
    "I'm sorry, I couldn't interpret the image. Please try again with a clearer image or add a question.";

/// Archives images and triggers a knowledge sync in the background
#[derive(Clone)]
pub struct ImageArchiver {
    store: Arc<dyn ObjectStore>,
    sync: Arc<dyn KnowledgeSync>,
    prefix: String,
}

impl ImageArchiver {
    pub fn new(store: Arc<dyn ObjectStore>, sync: Arc<dyn KnowledgeSync>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            sync,
            prefix: prefix.into(),
        }
    }

    /// Start archiving on a detached task; failures are only logged
    pub fn spawn(&self, images: Vec<ImageAttachment>) {
        let archiver = self.clone();
        tokio::spawn(async move {
            let success = match archiver.archive(images).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Background image archive failed");
                    false
                }
            };
            metrics::record_image_archive(success);
        });
    }

    async fn archive(&self, images: Vec<ImageAttachment>) -> Result<()> {
        for image in images {
            let key = image_key(&self.prefix, &image);
            let location = self.store.put(&key, image.data, &image.media_type).await?;
            debug!(location = %location, "Archived image");
        }

        let job = self.sync.start_sync().await?;
        info!(job_id = ?job, "Knowledge sync requested after image archive");
        Ok(())
    }
}

/// Answers image queries
pub struct MultimodalResponder {
    gateway: Arc<dyn CompletionGateway>,
    archiver: Option<ImageArchiver>,
    params: SamplingParams,
}

impl MultimodalResponder {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            gateway,
            archiver: None,
            params: SamplingParams::default(),
        }
    }

    pub fn with_archiver(mut self, archiver: ImageArchiver) -> Self {
        self.archiver = Some(archiver);
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    /// Answer from the images; never fails
    pub async fn answer(&self, query: &Query) -> OrchestrationResult {
        if let Some(archiver) = &self.archiver {
            archiver.spawn(query.images.clone());
        }

        let prompt = if query.question.trim().is_empty() {
            DEFAULT_IMAGE_PROMPT.to_string()
        } else {
            query.question.clone()
        };

        let request = CompletionRequest::new(prompt)
            .with_images(query.images.clone())
            .with_params(self.params);

        let reply = self.gateway.complete(request).await;
        metrics::record_completion("vision", reply.is_ok());

        let answer = match reply {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => IMAGE_APOLOGY.to_string(),
            Err(e) => {
                warn!(error = %e, "Vision completion failed");
                IMAGE_APOLOGY.to_string()
            }
        };

        OrchestrationResult::answer_only(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MockGateway;
    use crate::errors::AppError;
    use crate::storage::{LocalObjectStore, NoopSync};
    use async_trait::async_trait;
    use std::time::Duration;

    struct BrokenStore;

    #[async_trait]
    impl ObjectStore for BrokenStore {
        async fn put(&self, _key: &str, _data: Vec<u8>, _media_type: &str) -> Result<String> {
            Err(AppError::ObjectStore {
                message: "bucket missing".to_string(),
            })
        }
    }

    fn png() -> ImageAttachment {
        ImageAttachment::new(vec![0x89, b'P', b'N', b'G'], "image/png")
    }

    #[tokio::test]
    async fn test_empty_question_uses_default_prompt() {
        let gateway = Arc::new(MockGateway::new().with_fallback("A bar chart of sales."));
        let responder = MultimodalResponder::new(gateway.clone());

        let result = responder.answer(&Query::new("").with_image(png())).await;

        assert_eq!(result.answer, "A bar chart of sales.");
        let request = &gateway.requests()[0];
        assert_eq!(request.prompt, DEFAULT_IMAGE_PROMPT);
        assert_eq!(request.images.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_reply_becomes_apology() {
        let responder = MultimodalResponder::new(Arc::new(MockGateway::new().with_fallback("  ")));
        let result = responder.answer(&Query::new("What is this?").with_image(png())).await;
        assert_eq!(result.answer, IMAGE_APOLOGY);
    }

    #[tokio::test]
    async fn test_vision_failure_becomes_apology() {
        let gateway = MockGateway::new().fail_when("What", "model overloaded");
        let responder = MultimodalResponder::new(Arc::new(gateway));
        let result = responder.answer(&Query::new("What is this?").with_image(png())).await;
        assert_eq!(result.answer, IMAGE_APOLOGY);
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn test_archive_failure_is_invisible() {
        let archiver = ImageArchiver::new(Arc::new(BrokenStore), Arc::new(NoopSync), "images");
        let responder = MultimodalResponder::new(Arc::new(MockGateway::new().with_fallback("A cat.")))
            .with_archiver(archiver);

        let result = responder.answer(&Query::new("").with_image(png())).await;

        assert_eq!(result.answer, "A cat.");
        assert!(result.session_id.is_none());
    }

    #[tokio::test]
    async fn test_archive_writes_content_addressed_image() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = ImageArchiver::new(
            Arc::new(LocalObjectStore::new(dir.path())),
            Arc::new(NoopSync),
            "images",
        );
        let responder = MultimodalResponder::new(Arc::new(MockGateway::new().with_fallback("A logo.")))
            .with_archiver(archiver);

        let image = png();
        let expected = dir.path().join(image_key("images", &image));
        responder.answer(&Query::new("").with_image(image)).await;

        for _ in 0..50 {
            if expected.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(expected.exists());
    }
}
