//! End-to-end behavior of the orchestrator through the public API

use async_trait::async_trait;
use queryforge_common::completion::{CompletionGateway, MockGateway};
use queryforge_common::db::{ColumnInfo, StructuredDataSource};
use queryforge_common::errors::{AppError, Result};
use queryforge_common::knowledge::{
    referenced_numbers, GenerationSettings, KnowledgeClient, KnowledgeService, ProviderCitation,
    ProviderResponse, RetrievalSettings, StaticDocumentDirectory,
};
use queryforge_common::orchestrator::{
    ImageArchiver, IntentClassifier, Orchestrator, DEFAULT_IMAGE_PROMPT,
};
use queryforge_common::storage::{KnowledgeSync, ObjectStore};
use queryforge_common::types::{ImageAttachment, Query, SourceLocation};
use queryforge_common::StructuredQueryExecutor;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Data source with a single `customers(id int, name text)` table
struct CustomersTable {
    rows: Vec<serde_json::Value>,
    statements: Mutex<Vec<String>>,
}

impl CustomersTable {
    fn returning(rows: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            rows,
            statements: Mutex::new(Vec::new()),
        })
    }

    fn executed(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredDataSource for CustomersTable {
    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(vec!["customers".to_string()])
    }

    async fn list_columns(&self, _table: &str) -> Result<Vec<ColumnInfo>> {
        Ok(vec![ColumnInfo::new("id", "int"), ColumnInfo::new("name", "text")])
    }

    fn adapter_name(&self) -> String {
        "postgresql".to_string()
    }

    async fn execute(&self, statement: &str) -> Result<Vec<serde_json::Value>> {
        self.statements.lock().unwrap().push(statement.to_string());
        Ok(self.rows.clone())
    }
}

/// Knowledge service returning a fixed response, or failing
struct CannedKnowledge {
    response: Option<ProviderResponse>,
}

#[async_trait]
impl KnowledgeService for CannedKnowledge {
    async fn retrieve_and_generate(
        &self,
        _question: &str,
        _session_id: Option<&str>,
        _retrieval: &RetrievalSettings,
        _generation: &GenerationSettings,
    ) -> Result<ProviderResponse> {
        self.response.clone().ok_or_else(|| AppError::KnowledgeService {
            message: "service unavailable".to_string(),
        })
    }
}

/// Object store that takes a long time and then fails
struct SlowFailingStore {
    attempts: AtomicUsize,
}

#[async_trait]
impl ObjectStore for SlowFailingStore {
    async fn put(&self, _key: &str, _data: Vec<u8>, _media_type: &str) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(AppError::ObjectStore {
            message: "access denied".to_string(),
        })
    }
}

struct FailingSync;

#[async_trait]
impl KnowledgeSync for FailingSync {
    async fn start_sync(&self) -> Result<Option<String>> {
        Err(AppError::KnowledgeService {
            message: "sync conflict".to_string(),
        })
    }
}

fn citation(number: usize, filename: &str) -> ProviderCitation {
    ProviderCitation {
        number,
        title: String::new(),
        filename: filename.to_string(),
        content: format!("Excerpt of {}", filename),
        location: SourceLocation {
            bucket: Some("docs".to_string()),
            key: Some(filename.to_string()),
            uri: Some(format!("s3://docs/{}", filename)),
        },
    }
}

fn s3_guide() -> ProviderResponse {
    ProviderResponse {
        answer: "S3 is object storage [1].".to_string(),
        citations: vec![citation(1, "guide.pdf")],
        session_id: Some("session-s3".to_string()),
    }
}

fn build(
    gateway: MockGateway,
    source: Arc<CustomersTable>,
    knowledge: Option<ProviderResponse>,
    documents: &[&str],
) -> (Orchestrator, Arc<MockGateway>) {
    let gateway = Arc::new(gateway);
    let shared: Arc<dyn CompletionGateway> = gateway.clone();

    let structured = StructuredQueryExecutor::new(source, Arc::clone(&shared));
    let knowledge = KnowledgeClient::new(
        Arc::new(CannedKnowledge { response: knowledge }),
        Arc::new(StaticDocumentDirectory::from_names(documents.iter().copied())),
    );

    (Orchestrator::new(shared, structured, knowledge), gateway)
}

#[tokio::test]
async fn structured_count_question() {
    let source = CustomersTable::returning(vec![json!({ "count": 5 })]);
    let gateway = MockGateway::new()
        .reply_when("Classification:", "STRUCTURED")
        .reply_when("SQL:", "SELECT COUNT(*) FROM customers")
        .reply_when("Query results", "You have 5 customers.");
    let (orchestrator, gateway) = build(gateway, source.clone(), None, &[]);

    let result = orchestrator
        .handle(Query::new("How many customers do we have?"))
        .await
        .unwrap();

    assert!(result.answer.contains('5'));
    assert!(result.citations.is_empty());
    assert!(result.session_id.is_none());
    assert_eq!(source.executed(), vec!["SELECT COUNT(*) FROM customers".to_string()]);

    let prompts: Vec<_> = gateway.requests().into_iter().map(|r| r.prompt).collect();
    assert!(prompts[1].contains("customers(id int, name text)"));
    assert!(prompts[2].contains(r#"{"count":5}"#));
}

#[tokio::test]
async fn unstructured_question_keeps_correct_numbering() {
    let gateway = MockGateway::new().reply_when("Classification:", "UNSTRUCTURED");
    let (orchestrator, _) = build(
        gateway,
        CustomersTable::returning(vec![]),
        Some(s3_guide()),
        &["guide.pdf"],
    );

    let result = orchestrator.handle(Query::new("What is S3?")).await.unwrap();

    assert_eq!(result.answer, "S3 is object storage [1].");
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].number, 1);
    assert_eq!(result.citations[0].filename, "guide.pdf");
    assert_eq!(result.session_id.as_deref(), Some("session-s3"));
}

#[tokio::test]
async fn image_question_is_not_delayed_by_background_failures() {
    let store = Arc::new(SlowFailingStore {
        attempts: AtomicUsize::new(0),
    });
    let gateway = MockGateway::new()
        .reply_when("Classification:", "STRUCTURED")
        .with_fallback("The image shows a quarterly revenue chart.");
    let (orchestrator, gateway) = build(gateway, CustomersTable::returning(vec![]), None, &[]);
    let orchestrator = orchestrator.with_archiver(ImageArchiver::new(
        store.clone(),
        Arc::new(FailingSync),
        "images",
    ));

    let png = ImageAttachment::new(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a], "image/png");
    let started = Instant::now();
    let result = orchestrator.handle(Query::new("").with_image(png)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.answer, "The image shows a quarterly revenue chart.");
    assert!(result.citations.is_empty());
    assert!(result.session_id.is_none());

    let requests = gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, DEFAULT_IMAGE_PROMPT);
    assert_eq!(requests[0].images.len(), 1);
}

#[tokio::test]
async fn mutating_statement_never_executes() {
    let source = CustomersTable::returning(vec![]);
    let gateway = MockGateway::new()
        .reply_when("Classification:", "STRUCTURED")
        .reply_when("SQL:", "DROP TABLE customers");
    let (orchestrator, _) = build(gateway, source.clone(), None, &[]);

    let result = orchestrator
        .handle(Query::new("Remove the customers table"))
        .await
        .unwrap();

    assert!(result.answer.contains("unable to query the database."));
    assert!(source.executed().is_empty());
}

#[tokio::test]
async fn non_select_statements_are_all_rejected() {
    let statements = [
        "DELETE FROM customers",
        "  update customers set name = 'x'",
        "```sql\nINSERT INTO customers VALUES (1, 'x')\n```",
        "SELECT 1; DROP TABLE customers",
        "WITH doomed AS (DELETE FROM customers RETURNING *) SELECT * FROM doomed",
    ];

    for statement in statements {
        let source = CustomersTable::returning(vec![]);
        let gateway = MockGateway::new()
            .reply_when("Classification:", "STRUCTURED")
            .reply_when("SQL:", statement);
        let (orchestrator, _) = build(gateway, source.clone(), None, &[]);

        let result = orchestrator.handle(Query::new("Do something")).await.unwrap();

        assert!(result.answer.contains("unable to query the database."), "{}", statement);
        assert!(source.executed().is_empty(), "{}", statement);
    }
}

#[tokio::test]
async fn hybrid_answer_is_always_the_merged_text() {
    let source = CustomersTable::returning(vec![json!({ "count": 5 })]);
    let gateway = MockGateway::new()
        .reply_when("Classification:", "HYBRID")
        .reply_when("Combined answer:", "You have 5 customers, and S3 is object storage [1].")
        .reply_when("SQL:", "SELECT COUNT(*) FROM customers")
        .reply_when("Query results", "You have 5 customers.");
    let (orchestrator, gateway) = build(gateway, source, Some(s3_guide()), &["guide.pdf"]);

    let result = orchestrator
        .handle(Query::new("How many customers do we have and what is S3?"))
        .await
        .unwrap();

    assert_ne!(result.answer, "You have 5 customers.");
    assert_ne!(result.answer, "S3 is object storage [1].");
    assert_eq!(result.answer, "You have 5 customers, and S3 is object storage [1].");
    assert_eq!(result.session_id.as_deref(), Some("session-s3"));

    let merge = gateway
        .requests()
        .into_iter()
        .find(|r| r.prompt.contains("Combined answer:"))
        .unwrap();
    assert!(merge.prompt.contains("You have 5 customers."));
    assert!(merge.prompt.contains("S3 is object storage [1]."));
}

#[tokio::test]
async fn hybrid_structured_failure_yields_knowledge_citations_and_session() {
    let gateway = MockGateway::new()
        .reply_when("Classification:", "HYBRID")
        .fail_when("SQL:", "model overloaded");
    let (orchestrator, _) = build(
        gateway,
        CustomersTable::returning(vec![]),
        Some(s3_guide()),
        &["guide.pdf"],
    );

    let result = orchestrator
        .handle(Query::new("Customers and storage?"))
        .await
        .unwrap();

    let expected = KnowledgeClient::new(
        Arc::new(CannedKnowledge {
            response: Some(s3_guide()),
        }),
        Arc::new(StaticDocumentDirectory::from_names(["guide.pdf"])),
    )
    .query("Customers and storage?", None)
    .await
    .unwrap();

    assert_eq!(result.citations, expected.citations);
    assert_eq!(result.session_id, expected.session_id);
}

#[tokio::test]
async fn classification_is_idempotent() {
    let gateway: Arc<dyn CompletionGateway> =
        Arc::new(MockGateway::new().reply_when("Classification:", "UNSTRUCTURED"));
    let classifier = IntentClassifier::new(gateway);

    let first = classifier.classify("What is our refund policy?").await.unwrap();
    let second = classifier.classify("What is our refund policy?").await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn synthesis_prompt_never_exceeds_fifty_rows() {
    let rows = (0..200).map(|i| json!({ "id": i, "name": format!("customer-{}", i) })).collect();
    let gateway = MockGateway::new()
        .reply_when("Classification:", "STRUCTURED")
        .reply_when("SQL:", "SELECT id, name FROM customers")
        .reply_when("Query results", "There are 200 customers.");
    let (orchestrator, gateway) = build(gateway, CustomersTable::returning(rows), None, &[]);

    orchestrator.handle(Query::new("List all customers")).await.unwrap();

    let synthesis = gateway
        .requests()
        .into_iter()
        .find(|r| r.prompt.contains("Query results"))
        .unwrap();
    assert_eq!(synthesis.prompt.matches("customer-").count(), 50);
}

#[tokio::test]
async fn renumbered_markers_and_citations_agree() {
    let response = ProviderResponse {
        answer: "Buckets are regional [1]. Versioning keeps history [2]. Lifecycle rules expire objects [3]."
            .to_string(),
        citations: vec![
            citation(1, "buckets.pdf"),
            citation(2, "versioning.pdf"),
            citation(3, "lifecycle.pdf"),
        ],
        session_id: None,
    };
    let gateway = MockGateway::new().reply_when("Classification:", "UNSTRUCTURED");
    let (orchestrator, _) = build(
        gateway,
        CustomersTable::returning(vec![]),
        Some(response),
        &["lifecycle.pdf", "versioning.pdf", "buckets.pdf", "pricing.pdf"],
    );

    let result = orchestrator.handle(Query::new("How does S3 work?")).await.unwrap();

    assert_eq!(
        result.answer,
        "Buckets are regional [3]. Versioning keeps history [2]. Lifecycle rules expire objects [1]."
    );

    let in_text = referenced_numbers(&result.answer);
    let in_list: Vec<_> = result.citations.iter().map(|c| c.number).collect();
    assert_eq!(in_text, in_list);
    assert_eq!(result.citations[0].filename, "lifecycle.pdf");
}
