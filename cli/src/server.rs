use crate::reader::LogReplayer;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chokepoint_core::{Alert, CallRecord, Config, MonitorEngine, Severity};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    engine: Arc<MonitorEngine>,
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct RecordBatch {
    records: Vec<CallRecord>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<String> {
    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    version: String,
    running: bool,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    logs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AlertsResponse {
    alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
struct IngestSummary {
    accepted: usize,
    rejected: usize,
    alerts: usize,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AlertQuery {
    limit: Option<usize>,
    severity: Option<Severity>,
}

/// Optional log file to replay into the engine while serving.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    pub path: PathBuf,
    pub looping: bool,
}

pub async fn start_server(config: Config, replay: Option<ReplaySource>) -> Result<()> {
    let engine = init_engine(&config).await?;

    if let Some(source) = replay {
        let replayer = LogReplayer::from_file(&source.path, source.looping)?;
        tracing::info!(
            path = %source.path.display(),
            records = replayer.len(),
            looping = source.looping,
            "replaying call log"
        );
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = replayer.run(engine).await {
                tracing::error!("Log replay failed: {}", e);
            }
        });
    }

    let app = build_router(&config, Arc::clone(&engine));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    println!(
        "\nChokepoint server started\n-------------------------------------------------\n   Server:    http://{}\n   Graph:     http://{}/api/graph\n   Alerts:    http://{}/api/alerts\n   Stats:     http://{}/api/stats\n   Ingest:    POST http://{}/api/records\n-------------------------------------------------\n",
        addr, addr, addr, addr, addr
    );

    axum::serve(listener, app).await?;
    engine.stop().await;
    Ok(())
}

pub async fn init_engine(config: &Config) -> Result<Arc<MonitorEngine>> {
    config.validate().context("Invalid configuration")?;
    let engine = Arc::new(MonitorEngine::new(config.clone()));
    engine.start().await?;
    Ok(engine)
}

pub fn build_router(config: &Config, engine: Arc<MonitorEngine>) -> Router {
    let state = AppState {
        engine,
        verbose: config.server.verbose,
    };

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/graph", get(graph_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/alerts", get(alerts_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/analysis", get(analysis_handler))
        .route("/api/records", post(ingest_records_handler));

    let router = if config.server.cors_enabled {
        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors()),
        )
    } else {
        router.layer(TraceLayer::new_for_http())
    };
    router.with_state(state)
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = HealthStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        running: state.engine.is_running().await,
    };
    Json(ApiResponse::success(status))
}

async fn graph_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.engine.export().await))
}

async fn logs_handler(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let mut logs = state.engine.recent_logs().await;
    if let Some(limit) = query.limit {
        let skip = logs.len().saturating_sub(limit);
        logs.drain(..skip);
    }
    Json(ApiResponse::success(LogsResponse { logs }))
}

async fn alerts_handler(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> impl IntoResponse {
    let alerts: Vec<Alert> = state
        .engine
        .alerts()
        .await
        .into_iter()
        .filter(|alert| query.severity.map_or(true, |s| alert.severity == s))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Json(ApiResponse::success(AlertsResponse { alerts }))
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.engine.stats().await))
}

async fn analysis_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiResponse<String>>)> {
    match state.engine.report().await {
        Some(report) => Ok((StatusCode::OK, Json(ApiResponse::success(report)))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("No analysis pass has run yet".to_string())),
        )),
    }
}

async fn ingest_records_handler(
    State(state): State<AppState>,
    Json(batch): Json<RecordBatch>,
) -> impl IntoResponse {
    let mut summary = IngestSummary {
        accepted: 0,
        rejected: 0,
        alerts: 0,
    };

    for record in batch.records {
        match state.engine.ingest(record).await {
            Ok(raised) => {
                summary.accepted += 1;
                summary.alerts += raised.len();
            }
            Err(e) => {
                summary.rejected += 1;
                tracing::warn!("Rejected record: {}", e);
            }
        }
    }

    if summary.accepted > 0 {
        state.engine.analyze_now().await;
    }

    if state.verbose {
        tracing::info!(
            accepted = summary.accepted,
            rejected = summary.rejected,
            alerts = summary.alerts,
            "ingested record batch"
        );
    }

    let status = if summary.rejected == 0 {
        StatusCode::OK
    } else {
        StatusCode::PARTIAL_CONTENT
    };
    (status, Json(ApiResponse::success(summary)))
}
