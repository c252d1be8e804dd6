//! QueryForge Common Library
//!
//! The query orchestration core shared by every QueryForge service:
//! - Intent classification and routing
//! - Text-to-SQL over the business database
//! - Knowledge retrieval with citation renumbering
//! - Image fast path with background archiving
//! - Completion gateway abstraction
//! - Error types, configuration and metrics

pub mod completion;
pub mod config;
pub mod db;
pub mod errors;
pub mod knowledge;
pub mod metrics;
pub mod orchestrator;
pub mod storage;
pub mod structured;
pub mod types;

// Re-export commonly used types
pub use completion::CompletionGateway;
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use knowledge::KnowledgeClient;
pub use orchestrator::Orchestrator;
pub use structured::StructuredQueryExecutor;
pub use types::{Citation, ImageAttachment, OrchestrationResult, Query};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
