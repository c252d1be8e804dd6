//! Query Orchestrator
//!
//! Decides how each query is answered:
//!
//! ```text
//! START ─ images? ─ yes ─> MULTIMODAL
//!            │
//!            no
//!            ▼
//!       CLASSIFYING ─> STRUCTURED   ─> structured executor
//!                   ─> UNSTRUCTURED ─> knowledge client
//!                   ─> HYBRID       ─> both in parallel, then merge
//!                   ─> FALLBACK     ─> knowledge client
//! ```

mod classifier;
mod multimodal;

pub use classifier::{parse_intent, Classification, IntentClassifier, IntentLabel};
pub use multimodal::{ImageArchiver, MultimodalResponder, DEFAULT_IMAGE_PROMPT, IMAGE_APOLOGY};

use crate::completion::{CompletionGateway, CompletionRequest, SamplingParams};
use crate::errors::{AppError, Result};
use crate::knowledge::KnowledgeClient;
use crate::metrics::{self, QueryTimer};
use crate::structured::StructuredQueryExecutor;
use crate::types::{OrchestrationResult, Query};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Answer when neither hybrid branch found anything
pub const NO_INFORMATION_ANSWER: &str =
    "I'm sorry, I couldn't find any information to answer that question.";

/// Path a query took through the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Multimodal,
    Structured,
    Unstructured,
    Hybrid,
    /// Classification was indeterminate; answered from the knowledge source
    Fallback,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Multimodal => "multimodal",
            Route::Structured => "structured",
            Route::Unstructured => "unstructured",
            Route::Hybrid => "hybrid",
            Route::Fallback => "fallback",
        }
    }
}

impl From<IntentLabel> for Route {
    fn from(label: IntentLabel) -> Self {
        match label {
            IntentLabel::Structured => Route::Structured,
            IntentLabel::Unstructured => Route::Unstructured,
            IntentLabel::Hybrid => Route::Hybrid,
        }
    }
}

fn merge_prompt(question: &str, structured: &str, knowledge: &str) -> String {
    format!(
        "Two partial answers were produced for the same question. Combine them into one response.\n\n\
         Question: {question}\n\n\
         First partial answer:\n{structured}\n\n\
         Second partial answer:\n{knowledge}\n\n\
         Instructions:\n\
         - Write one coherent, concise answer that uses the facts from both.\n\
         - Do not mention where the information came from (no databases, documents or sources).\n\
         - Do not repeat facts that appear in both answers.\n\
         - Keep bracketed reference markers such as [1] exactly as written.\n\n\
         Combined answer:",
        question = question,
        structured = structured.trim(),
        knowledge = knowledge.trim(),
    )
}

/// Convert a branch's outcome into a result, blank on any failure
fn settle_branch(
    branch: &'static str,
    outcome: std::result::Result<Result<OrchestrationResult>, JoinError>,
) -> OrchestrationResult {
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(branch, error = %e, "Hybrid branch failed");
            OrchestrationResult::blank()
        }
        Err(e) => {
            warn!(branch, error = %e, "Hybrid branch task aborted");
            OrchestrationResult::blank()
        }
    }
}

/// Entry point for every query
pub struct Orchestrator {
    gateway: Arc<dyn CompletionGateway>,
    classifier: IntentClassifier,
    structured: Arc<StructuredQueryExecutor>,
    knowledge: Arc<KnowledgeClient>,
    multimodal: MultimodalResponder,
    params: SamplingParams,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn CompletionGateway>,
        structured: StructuredQueryExecutor,
        knowledge: KnowledgeClient,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&gateway)),
            multimodal: MultimodalResponder::new(Arc::clone(&gateway)),
            gateway,
            structured: Arc::new(structured),
            knowledge: Arc::new(knowledge),
            params: SamplingParams::default(),
        }
    }

    /// Archive images from image queries in the background
    pub fn with_archiver(mut self, archiver: ImageArchiver) -> Self {
        self.multimodal = self.multimodal.with_archiver(archiver);
        self
    }

    /// Sampling for the merge and vision calls
    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self.multimodal = self.multimodal.with_params(params);
        self
    }

    /// Whether a knowledge source is configured
    pub fn knowledge_configured(&self) -> bool {
        self.knowledge.is_configured()
    }

    /// Answer one query
    ///
    /// # Errors
    /// Classification failures and knowledge-source errors on the
    /// UNSTRUCTURED and FALLBACK routes. Every other failure is folded into
    /// the answer. On the HYBRID route a missing knowledge source is a blank
    /// branch like any other branch failure, so the structured answer is
    /// returned on its own.
    pub async fn handle(&self, query: Query) -> Result<OrchestrationResult> {
        let span = info_span!("query", query_id = %Uuid::new_v4(), route = field::Empty);
        self.route(query).instrument(span).await
    }

    async fn route(&self, query: Query) -> Result<OrchestrationResult> {
        if query.question.trim().is_empty() && query.images.is_empty() {
            return Err(AppError::Validation {
                message: "a question or at least one image is required".to_string(),
                field: Some("question".to_string()),
            });
        }

        let timer = QueryTimer::start();
        let (route, outcome) = self.dispatch(&query).await;
        let label = route.map_or("unclassified", |r| r.as_str());
        let duration = timer.finish(label, outcome.is_ok());

        match &outcome {
            Ok(result) => info!(
                route = label,
                citations = result.citations.len(),
                duration_ms = (duration * 1000.0) as u64,
                "Query answered"
            ),
            Err(e) => warn!(
                route = label,
                error = %e,
                duration_ms = (duration * 1000.0) as u64,
                "Query failed"
            ),
        }

        outcome
    }

    /// Pick a route and run it; the route is `None` when classification failed
    async fn dispatch(&self, query: &Query) -> (Option<Route>, Result<OrchestrationResult>) {
        if !query.images.is_empty() {
            Span::current().record("route", Route::Multimodal.as_str());
            return (Some(Route::Multimodal), Ok(self.multimodal.answer(query).await));
        }

        let route = match self.classifier.classify(&query.question).await {
            Ok(Classification::Label(label)) => Route::from(label),
            Ok(Classification::Unrecognized(raw)) => {
                warn!(label = %raw, "Unrecognized intent label, using knowledge source");
                Route::Fallback
            }
            Err(e) => return (None, Err(e)),
        };
        Span::current().record("route", route.as_str());

        let outcome = match route {
            Route::Structured => Ok(self.structured.execute(&query.question).await),
            Route::Hybrid => self.hybrid(query).await,
            _ => {
                self.knowledge
                    .query(&query.question, query.session_id.as_deref())
                    .await
            }
        };
        (Some(route), outcome)
    }

    /// Run both branches concurrently, then merge
    async fn hybrid(&self, query: &Query) -> Result<OrchestrationResult> {
        let structured = Arc::clone(&self.structured);
        let knowledge = Arc::clone(&self.knowledge);
        let structured_question = query.question.clone();
        let knowledge_question = query.question.clone();
        let session_id = query.session_id.clone();

        let structured_task = tokio::spawn(
            async move { structured.try_execute(&structured_question).await }.in_current_span(),
        );
        let knowledge_task = tokio::spawn(
            async move { knowledge.query(&knowledge_question, session_id.as_deref()).await }
                .in_current_span(),
        );

        let (structured_outcome, knowledge_outcome) = tokio::join!(structured_task, knowledge_task);

        let structured = settle_branch("structured", structured_outcome);
        let knowledge = settle_branch("knowledge", knowledge_outcome);

        self.merge(&query.question, structured, knowledge).await
    }

    async fn merge(
        &self,
        question: &str,
        structured: OrchestrationResult,
        knowledge: OrchestrationResult,
    ) -> Result<OrchestrationResult> {
        match (structured.is_blank(), knowledge.is_blank()) {
            (true, true) => {
                warn!("Both hybrid branches were blank");
                Ok(OrchestrationResult {
                    answer: NO_INFORMATION_ANSWER.to_string(),
                    citations: Vec::new(),
                    session_id: knowledge.session_id,
                })
            }
            (true, false) => Ok(knowledge),
            (false, true) => Ok(structured),
            (false, false) => {
                let request = CompletionRequest::new(merge_prompt(
                    question,
                    &structured.answer,
                    &knowledge.answer,
                ))
                .with_params(self.params);

                let reply = self.gateway.complete(request).await;
                metrics::record_completion("merge", reply.is_ok());

                match reply {
                    Ok(text) if !text.trim().is_empty() => Ok(OrchestrationResult {
                        answer: text.trim().to_string(),
                        citations: knowledge.citations,
                        session_id: knowledge.session_id,
                    }),
                    Ok(_) => {
                        warn!("Merge produced no text, returning knowledge answer");
                        Ok(knowledge)
                    }
                    Err(e) => {
                        warn!(error = %e, "Merge failed, returning knowledge answer");
                        Ok(knowledge)
                    }
                }
            }
        }
    }
}
