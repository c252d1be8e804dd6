//! QueryForge API Gateway
//!
//! The entry point for all external query requests.
//! Handles:
//! - Request validation and routing
//! - Wiring the orchestrator from configuration
//! - Observability (logging, metrics)

mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use queryforge_common::{
    completion::{self, SamplingParams},
    config::AppConfig,
    db::{DbPool, SeaOrmDataSource},
    knowledge,
    metrics::{self, QUERY_LATENCY_BUCKETS},
    orchestrator::{ImageArchiver, Orchestrator},
    storage, StructuredQueryExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    init_tracing(&config);

    info!("Starting QueryForge API Gateway v{}", queryforge_common::VERSION);

    // Initialize metrics
    init_metrics(&config)?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let orchestrator = build_orchestrator(&config, &db).await?;

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        orchestrator: Arc::new(orchestrator),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if config.observability.json_logging {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn init_metrics(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_port == 0 {
        warn!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            QUERY_LATENCY_BUCKETS,
        )?
        .install()?;

    metrics::register_metrics();
    info!(port = config.observability.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Build the orchestrator and its collaborators from configuration
async fn build_orchestrator(
    config: &AppConfig,
    db: &DbPool,
) -> queryforge_common::Result<Orchestrator> {
    let params = SamplingParams::from_config(&config.completion);
    let gateway = completion::create_gateway(&config.completion).await?;
    info!(model = gateway.model_name(), provider = %config.completion.provider, "Completion gateway ready");

    let structured =
        StructuredQueryExecutor::new(Arc::new(SeaOrmDataSource::new(db)), gateway.clone())
            .with_params(params);

    let knowledge = knowledge::create_client(&config.knowledge).await?;
    if !knowledge.is_configured() {
        warn!("No knowledge source configured; document questions will fail");
    }

    let mut orchestrator = Orchestrator::new(gateway, structured, knowledge).with_params(params);

    if let Some(store) = storage::create_object_store(&config.storage).await? {
        let sync = storage::create_sync(&config.knowledge).await?;
        orchestrator = orchestrator.with_archiver(ImageArchiver::new(
            store,
            sync,
            config.storage.image_prefix.clone(),
        ));
    }

    Ok(orchestrator)
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let max_body_bytes = state.config.server.max_body_bytes;
    let max_concurrent = state.config.server.max_concurrent_requests;

    // API routes
    let api_routes = Router::new().route("/query", post(handlers::query::query));

    // Compose the app
    Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(ConcurrencyLimitLayer::new(max_concurrent))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use queryforge_common::completion::MockGateway;
    use queryforge_common::config::DatabaseConfig;
    use queryforge_common::KnowledgeClient;
    use tower::ServiceExt;

    async fn test_state(gateway: MockGateway) -> AppState {
        test_state_with(gateway, AppConfig::default()).await
    }

    async fn test_state_with(gateway: MockGateway, config: AppConfig) -> AppState {
        let db = DbPool::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..config.database.clone()
        })
        .await
        .unwrap();

        let gateway: Arc<dyn queryforge_common::CompletionGateway> = Arc::new(gateway);
        let structured =
            StructuredQueryExecutor::new(Arc::new(SeaOrmDataSource::new(&db)), gateway.clone());
        let orchestrator = Orchestrator::new(gateway, structured, KnowledgeClient::unconfigured());

        AppState {
            config: Arc::new(config),
            db,
            orchestrator: Arc::new(orchestrator),
        }
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = create_router(test_state(MockGateway::new()).await);

        let (status, body) = send(app.clone(), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(app, Request::get("/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_structured_query_on_empty_database() {
        let gateway = MockGateway::new().reply_when("Classification:", "STRUCTURED");
        let app = create_router(test_state(gateway).await);

        let (status, body) = send(
            app,
            post_json("/v1/query", serde_json::json!({ "question": "How many customers?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], queryforge_common::structured::EMPTY_SOURCE_ANSWER);
        assert_eq!(body["citations"], serde_json::json!([]));
        assert!(body["session_id"].is_null());
    }

    #[tokio::test]
    async fn test_image_query() {
        let gateway = MockGateway::new().with_fallback("A pie chart.");
        let app = create_router(test_state(gateway).await);

        let (status, body) = send(
            app,
            post_json(
                "/v1/query",
                serde_json::json!({
                    "images": [{ "data": "iVBORw0KGgo=", "media_type": "image/png" }]
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "A pie chart.");
    }

    #[tokio::test]
    async fn test_unconfigured_knowledge_is_server_error() {
        let gateway = MockGateway::new().reply_when("Classification:", "UNSTRUCTURED");
        let app = create_router(test_state(gateway).await);

        let (status, body) = send(
            app,
            post_json("/v1/query", serde_json::json!({ "question": "What is the refund policy?" })),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let mut config = AppConfig::default();
        config.server.max_body_bytes = 64;
        let app = create_router(test_state_with(MockGateway::new(), config).await);

        let (status, body) = send(
            app,
            post_json("/v1/query", serde_json::json!({ "question": "x".repeat(200) })),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_malformed_json_is_validation_error() {
        let app = create_router(test_state(MockGateway::new()).await);

        let request = Request::post("/v1/query")
            .header("content-type", "application/json")
            .body(Body::from("{\"question\": "))
            .unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let app = create_router(test_state(MockGateway::new()).await);

        let (status, _) = send(app, post_json("/v1/query", serde_json::json!({ "question": "" }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
