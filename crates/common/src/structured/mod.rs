//! Structured Query Executor - natural language to SQL and back
//!
//! Pipeline for one question:
//! 1. Schema discovery against the live connection (never cached)
//! 2. Dialect detection from the adapter name
//! 3. Statement generation via the completion gateway
//! 4. Read-only safety gate
//! 5. Execution on the read connection
//! 6. Row capping
//! 7. Answer synthesis via the completion gateway
//!
//! Every failure degrades to an apologetic answer; callers of
//! [`StructuredQueryExecutor::execute`] never see an error.

mod dialect;

pub use dialect::SqlDialect;

use crate::completion::{CompletionGateway, CompletionRequest, SamplingParams};
use crate::db::{ColumnInfo, StructuredDataSource};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::types::OrchestrationResult;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows kept for synthesis, whatever the query produced
pub const MAX_RESULT_ROWS: usize = 50;

/// Stand-in for an empty result set in the synthesis prompt
pub const NO_RESULTS_MARKER: &str = "NO_RESULTS";

/// Answer for rejected or failed statements
pub const QUERY_FAILED_ANSWER: &str =
    "I'm sorry, I was unable to query the database. Please try rephrasing your question.";

/// Answer when the data source has no tables
pub const EMPTY_SOURCE_ANSWER: &str =
    "I'm sorry, the business database does not contain any tables yet, so I can't answer that question.";

/// Per-request view of the data source's tables and columns
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub tables: Vec<(String, Vec<ColumnInfo>)>,
}

impl SchemaSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Compact line-per-table description, e.g. `customers(id int, name text)`
    pub fn describe(&self) -> String {
        self.tables
            .iter()
            .map(|(table, columns)| {
                let columns = columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.data_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", table, columns)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Remove markdown code fences (with or without a language tag)
pub fn strip_code_fences(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.split_once('\n') {
            Some((tag, body))
                if tag
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                body
            }
            _ => rest
                .strip_prefix("sql")
                .filter(|r| r.starts_with(char::is_whitespace))
                .unwrap_or(rest),
        };
    }

    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }

    text.trim().to_string()
}

/// Accept only a single statement starting with SELECT
///
/// Returns the statement with trailing semicolons removed.
pub fn ensure_read_only(statement: &str) -> Result<String> {
    let statement = statement.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    if !starts_with_select(statement) {
        return Err(AppError::QueryExecution {
            message: "generated statement is not a SELECT".to_string(),
        });
    }

    if has_statement_separator(statement) {
        return Err(AppError::QueryExecution {
            message: "generated statement contains multiple statements".to_string(),
        });
    }

    Ok(statement.to_string())
}

/// A `;` outside quoted text, or an unterminated quote
fn has_statement_separator(statement: &str) -> bool {
    let mut open_quote: Option<char> = None;
    for c in statement.chars() {
        match open_quote {
            // Doubled quotes ('') close and reopen, which nets out
            Some(quote) if c == quote => open_quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => open_quote = Some(c),
            None if c == ';' => return true,
            None => {}
        }
    }
    open_quote.is_some()
}

fn starts_with_select(statement: &str) -> bool {
    let keyword = "select";
    match statement.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => !statement[keyword.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Serialize at most [`MAX_RESULT_ROWS`] rows, or the no-results marker
pub fn render_rows(rows: &[serde_json::Value]) -> Result<String> {
    if rows.is_empty() {
        return Ok(NO_RESULTS_MARKER.to_string());
    }

    let capped = &rows[..rows.len().min(MAX_RESULT_ROWS)];
    Ok(serde_json::to_string(capped)?)
}

fn generation_prompt(question: &str, dialect: &SqlDialect, schema: &SchemaSnapshot) -> String {
    format!(
        "You are an expert {dialect} analyst. Translate the question into one SQL query \
         for the database described below.\n\n\
         Database dialect: {dialect}\n\
         {hint}\n\n\
         Schema (one table per line):\n{schema}\n\n\
         Rules:\n\
         - Respond with the SQL statement only. No explanations, no markdown, no code fences.\n\
         - Write exactly one read-only SELECT statement.\n\
         - Never use INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, TRUNCATE, GRANT or any other \
           statement that changes data or schema.\n\
         - Use table and column names exactly as they appear in the schema.\n\n\
         Question: {question}\n\n\
         SQL:",
        dialect = dialect,
        hint = dialect.syntax_hint(),
        schema = schema.describe(),
        question = question,
    )
}

fn synthesis_prompt(question: &str, rows: &str) -> String {
    format!(
        "You are a helpful business data assistant. Answer the question using only the \
         query results below.\n\n\
         Question: {question}\n\n\
         Query results (JSON rows, at most {max} shown):\n{rows}\n\n\
         Instructions:\n\
         - Answer concisely in plain language.\n\
         - If the results are {marker}, say explicitly that no matching records were found.\n\
         - Do not mention SQL, tables or the database structure.\n\n\
         Answer:",
        question = question,
        max = MAX_RESULT_ROWS,
        rows = rows,
        marker = NO_RESULTS_MARKER,
    )
}

/// Answers questions from the relational business database
pub struct StructuredQueryExecutor {
    source: Arc<dyn StructuredDataSource>,
    gateway: Arc<dyn CompletionGateway>,
    params: SamplingParams,
}

impl StructuredQueryExecutor {
    pub fn new(source: Arc<dyn StructuredDataSource>, gateway: Arc<dyn CompletionGateway>) -> Self {
        Self {
            source,
            gateway,
            params: SamplingParams::default(),
        }
    }

    /// Override sampling for the generation and synthesis calls
    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    /// Answer a question, degrading every failure to an apology
    pub async fn execute(&self, question: &str) -> OrchestrationResult {
        match self.try_execute(question).await {
            Ok(result) => result,
            Err(AppError::EmptyDataSource) => {
                metrics::record_structured_outcome("empty");
                OrchestrationResult::answer_only(EMPTY_SOURCE_ANSWER)
            }
            Err(e) => {
                warn!(error = %e, "Structured query failed");
                OrchestrationResult::answer_only(QUERY_FAILED_ANSWER)
            }
        }
    }

    /// Answer a question, surfacing failures as errors
    pub async fn try_execute(&self, question: &str) -> Result<OrchestrationResult> {
        let schema = self.discover_schema().await?;
        if schema.is_empty() {
            return Err(AppError::EmptyDataSource);
        }

        let dialect = SqlDialect::detect(&self.source.adapter_name());
        let statement = self.generate_statement(question, &dialect, &schema).await?;

        let statement = ensure_read_only(&statement).map_err(|e| {
            warn!(statement = %statement, "Rejected generated statement");
            metrics::record_structured_outcome("rejected");
            e
        })?;

        info!(dialect = %dialect, statement = %statement, "Executing generated statement");

        let rows = self.source.execute(&statement).await.map_err(|e| {
            metrics::record_structured_outcome("failed");
            AppError::QueryExecution {
                message: e.to_string(),
            }
        })?;

        debug!(rows = rows.len(), "Statement returned rows");

        let rendered = render_rows(&rows)?;
        let reply = self
            .gateway
            .complete(
                CompletionRequest::new(synthesis_prompt(question, &rendered)).with_params(self.params),
            )
            .await;
        metrics::record_completion("synthesize", reply.is_ok());
        let answer = reply?;

        metrics::record_structured_outcome("answered");
        Ok(OrchestrationResult::answer_only(answer.trim()))
    }

    async fn discover_schema(&self) -> Result<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::default();
        for table in self.source.list_tables().await? {
            let columns = self.source.list_columns(&table).await?;
            snapshot.tables.push((table, columns));
        }
        Ok(snapshot)
    }

    async fn generate_statement(
        &self,
        question: &str,
        dialect: &SqlDialect,
        schema: &SchemaSnapshot,
    ) -> Result<String> {
        let prompt = generation_prompt(question, dialect, schema);
        let reply = self
            .gateway
            .complete(CompletionRequest::new(prompt).with_params(self.params))
            .await;
        metrics::record_completion("generate_sql", reply.is_ok());
        Ok(strip_code_fences(&reply?))
    }
}
