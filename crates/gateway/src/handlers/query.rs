//! Query handler

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::AppState;
use queryforge_common::{
    errors::{AppError, Result},
    ImageAttachment, OrchestrationResult, Query,
};

/// Media types accepted for image attachments
pub const SUPPORTED_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/gif", "image/webp"];

/// Query request
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_has_content"))]
pub struct QueryRequest {
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub question: String,

    #[serde(default)]
    #[validate(nested)]
    pub images: Vec<ImageInput>,

    pub session_id: Option<String>,
}

/// Base64-encoded image
#[derive(Debug, Deserialize, Validate)]
pub struct ImageInput {
    /// Base64 payload, optionally as a `data:` URL
    #[validate(length(min = 1))]
    pub data: String,

    #[validate(custom(function = "validate_media_type"))]
    pub media_type: String,
}

fn validate_has_content(request: &QueryRequest) -> std::result::Result<(), ValidationError> {
    if request.question.trim().is_empty() && request.images.is_empty() {
        return Err(ValidationError::new("empty_query")
            .with_message("a question or at least one image is required".into()));
    }
    Ok(())
}

fn validate_media_type(media_type: &str) -> std::result::Result<(), ValidationError> {
    if SUPPORTED_MEDIA_TYPES.contains(&media_type.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::new("unsupported_media_type"))
    }
}

impl ImageInput {
    fn decode(&self) -> Result<ImageAttachment> {
        let payload = match self.data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => self.data.as_str(),
        };

        let data = STANDARD.decode(payload.trim()).map_err(|e| AppError::Validation {
            message: format!("image data is not valid base64: {}", e),
            field: Some("images".to_string()),
        })?;

        Ok(ImageAttachment::new(data, self.media_type.to_ascii_lowercase()))
    }
}

impl QueryRequest {
    /// Validate and convert into a core query
    pub fn into_query(self) -> Result<Query> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: None,
        })?;

        let images = self
            .images
            .iter()
            .map(ImageInput::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(Query {
            question: self.question.trim().to_string(),
            images,
            session_id: self.session_id.filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Map a body that could not be read as a query request
fn reject_body(rejection: JsonRejection, limit: usize) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::Validation {
            message: rejection.body_text(),
            field: None,
        }
    }
}

/// Answer a question
pub async fn query(
    State(state): State<AppState>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<OrchestrationResult>> {
    let Json(request) =
        payload.map_err(|rejection| reject_body(rejection, state.config.server.max_body_bytes))?;
    let query = request.into_query()?;
    let result = state.orchestrator.handle(query).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> QueryRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_question_only() {
        let query = request(serde_json::json!({ "question": "  How many orders?  ", "session_id": "s1" }))
            .into_query()
            .unwrap();

        assert_eq!(query.question, "How many orders?");
        assert!(query.images.is_empty());
        assert_eq!(query.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_image_data_url_decoded() {
        let query = request(serde_json::json!({
            "images": [{ "data": "data:image/png;base64,AQID", "media_type": "IMAGE/PNG" }]
        }))
        .into_query()
        .unwrap();

        assert_eq!(query.images[0].data, vec![1, 2, 3]);
        assert_eq!(query.images[0].media_type, "image/png");
    }

    #[test]
    fn test_rejections() {
        let empty = request(serde_json::json!({ "question": "   " }));
        assert!(matches!(empty.into_query(), Err(AppError::Validation { .. })));

        let too_long = request(serde_json::json!({ "question": "x".repeat(4001) }));
        tokio_test::assert_err!(too_long.into_query());

        let pdf = request(serde_json::json!({
            "images": [{ "data": "AQID", "media_type": "application/pdf" }]
        }));
        tokio_test::assert_err!(pdf.into_query());

        let garbage = request(serde_json::json!({
            "images": [{ "data": "not base64!", "media_type": "image/png" }]
        }));
        assert!(garbage.into_query().is_err());
    }
}
