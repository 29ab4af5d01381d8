//! Digit Classifier API Server
//!
//! HTTP transport for single and batch digit classification.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use batch_coordinator::BatchCoordinator;
use image_preprocessor::{ImagePreprocessor, PreprocessError};
use inference_engine::InferenceEngine;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;

use config::{AppConfig, LoggingConfig};
use rate_limit::{DefaultGovernorConfig, RateLimitConfig};

/// Application state shared across handlers
pub struct AppState {
    /// Request coordinator over the process-wide model
    pub coordinator: Arc<BatchCoordinator>,
    /// Files accepted per batch request
    pub max_batch_items: usize,
    /// Request body limit in bytes
    pub max_body_bytes: usize,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Prediction requests accepted
    pub requests_served: AtomicU64,
    /// Prometheus exposition, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new application state around an already-loaded engine
    pub fn new(
        config: &AppConfig,
        engine: Arc<InferenceEngine>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Arc<Self>, PreprocessError> {
        let preprocessor = ImagePreprocessor::new(config.preprocess.clone())?;
        Ok(Arc::new(Self {
            coordinator: Arc::new(BatchCoordinator::new(preprocessor, engine)),
            max_batch_items: config.server.max_batch_items,
            max_body_bytes: config.server.max_body_bytes,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            requests_served: AtomicU64::new(0),
            metrics,
        }))
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: ServiceMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub inference: InferenceHealth,
}

/// Inference component health
#[derive(Debug, Serialize)]
pub struct InferenceHealth {
    pub status: String,
    pub backend: String,
    pub serialized: bool,
}

/// Service counters
#[derive(Debug, Serialize)]
pub struct ServiceMetrics {
    pub requests_served: u64,
    pub inference_calls: u64,
}

/// Root banner
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
}

/// Create the application router without rate limiting
pub fn create_router(state: Arc<AppState>) -> Router {
    build_router(state, None)
}

/// Create the application router, limiting only the prediction routes
pub fn create_limited_router(state: Arc<AppState>, limits: &RateLimitConfig) -> Router {
    if !limits.enabled {
        return create_router(state);
    }
    match rate_limit::create_governor_config(limits) {
        Some(governor) => {
            info!(
                "Rate limiting predictions: one request per {}s, burst {}",
                limits.per_second, limits.burst_size
            );
            build_router(state, Some(governor))
        }
        None => {
            warn!("Invalid rate limit settings {:?}, limiter disabled", limits);
            create_router(state)
        }
    }
}

fn build_router(state: Arc<AppState>, governor: Option<Arc<DefaultGovernorConfig>>) -> Router {
    let body_limit = state.max_body_bytes;

    let mut predictions = Router::new()
        .route("/predict", post(routes::predictions::predict))
        .route("/predict_batch", post(routes::predictions::predict_batch));
    if let Some(config) = governor {
        predictions = predictions.route_layer(GovernorLayer { config });
    }

    Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(predictions)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Digit classification API is running. POST images to /predict or /predict_batch."
            .to_string(),
    })
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let engine = state.coordinator.engine();

    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            inference: InferenceHealth {
                status: "ok".to_string(),
                backend: engine.backend().to_string(),
                serialized: engine.is_serialized(),
            },
        },
        metrics: ServiceMetrics {
            requests_served: state.requests_served.load(Ordering::Relaxed),
            inference_calls: engine.calls(),
        },
    };

    Json(response)
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Initialize logging
///
/// An unknown `level` falls back to INFO and is reported once the subscriber is live.
pub fn init_logging(config: &LoggingConfig) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let parsed = config.level.parse::<Level>();
    let level = parsed.as_ref().copied().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    if parsed.is_err() {
        warn!("Unknown log level {:?}, using INFO", config.level);
    }
    Ok(())
}

/// Install the global Prometheus recorder
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Load the model once and build shared state
pub fn build_state(config: &AppConfig, metrics: Option<PrometheusHandle>) -> anyhow::Result<Arc<AppState>> {
    let engine = Arc::new(InferenceEngine::from_config(&config.model)?);
    if config.model.warmup {
        // Failure is already logged; the first request will surface it again
        let _ = engine.warm_up();
    }
    Ok(AppState::new(config, engine, metrics)?)
}

/// Run the server
pub async fn run_server(config: &AppConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_limited_router(state, &config.rate_limit);

    let addr = config.server.addr();
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
