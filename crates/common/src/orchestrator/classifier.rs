//! Intent classification

use crate::completion::{CompletionGateway, CompletionRequest, SamplingParams};
use crate::errors::Result;
use crate::metrics;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which backend(s) a question needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentLabel {
    /// Relational business data
    Structured,
    /// Documents in the knowledge source
    Unstructured,
    /// Both
    Hybrid,
}

impl IntentLabel {
    /// Label text the model is asked to reply with
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Structured => "STRUCTURED",
            IntentLabel::Unstructured => "UNSTRUCTURED",
            IntentLabel::Hybrid => "HYBRID",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of parsing the classifier's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Label(IntentLabel),
    /// No label found; carries the raw reply for diagnosis
    Unrecognized(String),
}

/// Whole-word, case-insensitive search
fn contains_word(haystack: &str, word: &str) -> bool {
    let is_word_char = |c: char| c.is_ascii_alphanumeric() || c == '_';

    haystack.match_indices(word).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

/// Parse a free-text reply into a classification
///
/// Labels are searched as whole words in the order HYBRID, STRUCTURED,
/// UNSTRUCTURED, so co-occurring labels resolve deterministically and
/// `UNSTRUCTURED` is never read as `STRUCTURED`.
pub fn parse_intent(reply: &str) -> Classification {
    let upper = reply.to_ascii_uppercase();

    [IntentLabel::Hybrid, IntentLabel::Structured, IntentLabel::Unstructured]
        .into_iter()
        .find(|label| contains_word(&upper, label.as_str()))
        .map(Classification::Label)
        .unwrap_or_else(|| Classification::Unrecognized(reply.trim().to_string()))
}

fn classification_prompt(question: &str) -> String {
    format!(
        "Classify the question below by the kind of data needed to answer it.\n\n\
         STRUCTURED: answerable from the business database (counts, totals, records, \
         customers, orders, products, dates).\n\
         UNSTRUCTURED: answerable from documents (policies, guides, explanations, procedures).\n\
         HYBRID: needs both database records and document knowledge.\n\n\
         Reply with exactly one word: STRUCTURED, UNSTRUCTURED or HYBRID.\n\n\
         Question: {}\n\n\
         Classification:",
        question
    )
}

/// Labels questions with one completion call
pub struct IntentClassifier {
    gateway: Arc<dyn CompletionGateway>,
}

impl IntentClassifier {
    pub fn new(gateway: Arc<dyn CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// Classify a question; gateway failures propagate
    pub async fn classify(&self, question: &str) -> Result<Classification> {
        let request =
            CompletionRequest::new(classification_prompt(question)).with_params(SamplingParams::LABEL);

        let reply = self.gateway.complete(request).await;
        metrics::record_completion("classify", reply.is_ok());

        let classification = parse_intent(&reply?);
        debug!(classification = ?classification, "Classified question");
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MockGateway;
    use crate::errors::AppError;

    #[test]
    fn test_parse_exact_labels() {
        assert_eq!(parse_intent("STRUCTURED"), Classification::Label(IntentLabel::Structured));
        assert_eq!(parse_intent("UNSTRUCTURED"), Classification::Label(IntentLabel::Unstructured));
        assert_eq!(parse_intent("HYBRID"), Classification::Label(IntentLabel::Hybrid));
    }

    #[test]
    fn test_parse_is_lenient_about_surrounding_text() {
        assert_eq!(
            parse_intent("  The answer is: structured.\n"),
            Classification::Label(IntentLabel::Structured)
        );
        assert_eq!(
            parse_intent("**Unstructured**"),
            Classification::Label(IntentLabel::Unstructured)
        );
    }

    #[test]
    fn test_hybrid_wins_over_co_occurring_labels() {
        assert_eq!(
            parse_intent("STRUCTURED or HYBRID"),
            Classification::Label(IntentLabel::Hybrid)
        );
        assert_eq!(
            parse_intent("UNSTRUCTURED, maybe STRUCTURED"),
            Classification::Label(IntentLabel::Structured)
        );
    }

    #[test]
    fn test_unrecognized_keeps_raw_reply() {
        assert_eq!(
            parse_intent(" I don't know "),
            Classification::Unrecognized("I don't know".to_string())
        );
        assert_eq!(parse_intent("RESTRUCTUREDX"), Classification::Unrecognized("RESTRUCTUREDX".to_string()));
    }

    #[tokio::test]
    async fn test_classify_is_deterministic() {
        let gateway = Arc::new(MockGateway::new().reply_when("Classification:", "HYBRID"));
        let classifier = IntentClassifier::new(gateway.clone());

        let first = classifier.classify("Revenue and refund policy?").await.unwrap();
        let second = classifier.classify("Revenue and refund policy?").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Classification::Label(IntentLabel::Hybrid));
        assert_eq!(gateway.requests()[0].params, SamplingParams::LABEL);
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let gateway = Arc::new(MockGateway::new().fail_when("Classification:", "provider down"));
        let err = IntentClassifier::new(gateway).classify("Anything").await.unwrap_err();
        assert!(matches!(err, AppError::Completion { .. }));
    }
}
