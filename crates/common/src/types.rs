//! Request and response types shared by every query path

use serde::{Deserialize, Serialize};

/// An image attached to a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Raw image bytes
    pub data: Vec<u8>,

    /// Declared media type, e.g. `image/png`
    pub media_type: String,
}

impl ImageAttachment {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }

    /// File extension matching the declared media type
    pub fn extension(&self) -> &'static str {
        match self.media_type.to_ascii_lowercase().as_str() {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}

/// A single inbound question
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Question text (may be empty when only images are supplied)
    pub question: String,

    /// Attached images
    pub images: Vec<ImageAttachment>,

    /// Continuation token from a prior exchange
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Where a cited source lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// A normalized reference to a supporting source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Number as it appears in the answer text, e.g. `[2]`
    pub number: usize,

    /// Human-readable title
    pub title: String,

    /// Source filename
    pub filename: String,

    /// Excerpt of the supporting content
    pub content: String,

    /// Raw location metadata
    pub location: SourceLocation,
}

/// The single answer returned to callers, whichever backend produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub session_id: Option<String>,
}

impl OrchestrationResult {
    /// Answer without citations or session (structured and image paths)
    pub fn answer_only(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            citations: Vec::new(),
            session_id: None,
        }
    }

    /// Placeholder used when a hybrid branch fails
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn is_blank(&self) -> bool {
        self.answer.trim().is_empty()
    }
}
