//! Configuration management for QueryForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Structured data source configuration
    pub database: DatabaseConfig,

    /// Text completion gateway configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Knowledge retrieval configuration
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Object storage for uploaded images
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Maximum request body size (images are sent inline)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// Completion provider: openai, bedrock
    #[serde(default = "default_completion_provider")]
    pub provider: String,

    /// API key (openai-compatible providers)
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Text model
    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Vision-capable model used when images are attached
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    /// Maximum output tokens for orchestration calls
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for orchestration calls
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling width for orchestration calls
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnowledgeConfig {
    /// Knowledge provider: bedrock, none
    #[serde(default = "default_knowledge_provider")]
    pub provider: String,

    /// Knowledge base identifier
    pub knowledge_base_id: Option<String>,

    /// Generation model ARN used by retrieve-and-generate
    pub model_arn: Option<String>,

    /// Reranking model ARN
    pub rerank_model_arn: Option<String>,

    /// Data source to re-sync after image uploads
    pub data_source_id: Option<String>,

    /// Local directory listing the known source documents
    pub documents_dir: Option<PathBuf>,

    /// Bucket listing the known source documents (s3)
    pub documents_bucket: Option<String>,

    /// Key prefix of the known source documents (s3)
    #[serde(default)]
    pub documents_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage provider: local, s3
    #[serde(default = "default_storage_provider")]
    pub provider: String,

    /// Root directory for the local provider
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Bucket for the s3 provider
    pub bucket: Option<String>,

    /// Key prefix for uploaded images
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_concurrent() -> usize { 100 }
fn default_max_body_bytes() -> usize { 20 * 1024 * 1024 }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_completion_provider() -> String { "openai".to_string() }
fn default_completion_model() -> String { "gpt-4o-mini".to_string() }
fn default_vision_model() -> String { "gpt-4o".to_string() }
fn default_completion_timeout() -> u64 { 60 }
fn default_max_tokens() -> u32 { 1000 }
fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.9 }
fn default_knowledge_provider() -> String { "none".to_string() }
fn default_storage_provider() -> String { "local".to_string() }
fn default_storage_root() -> PathBuf { PathBuf::from("data/uploads") }
fn default_image_prefix() -> String { "images".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "queryforge".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_requests: default_max_concurrent(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            api_key: None,
            api_base: None,
            model: default_completion_model(),
            vision_model: default_vision_model(),
            timeout_secs: default_completion_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            provider: default_knowledge_provider(),
            knowledge_base_id: None,
            model_arn: None,
            rerank_model_arn: None,
            data_source_id: None,
            documents_dir: None,
            documents_bucket: None,
            documents_prefix: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            root: default_storage_root(),
            bucket: None,
            image_prefix: default_image_prefix(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }
}

impl CompletionConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "sqlite://data/business.db?mode=ro".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            completion: CompletionConfig::default(),
            knowledge: KnowledgeConfig::default(),
            storage: StorageConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
