// Statement Pipeline - Read-only API
// Watermarks and ledger rows per source, straight from the SQLite stores.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use statement_pipeline::logging::{init_logging, LogConfig};
use statement_pipeline::{
    LandingStore, LedgerStore, PipelineConfig, SourceCursor, SqliteLandingStore,
    SqliteLedgerStore, TransactionRecord,
};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
struct AppState {
    landing: Arc<Mutex<SqliteLandingStore>>,
    ledger: Arc<Mutex<SqliteLedgerStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Source watermark response
#[derive(Serialize)]
struct SourceResponse {
    source: String,
    landing_watermark: i64,
    ledger_watermark: i64,
    pending: i64,
}

impl From<SourceCursor> for SourceResponse {
    fn from(cursor: SourceCursor) -> Self {
        Self {
            pending: cursor.pending(),
            landing_watermark: cursor.landing,
            ledger_watermark: cursor.ledger,
            source: cursor.source,
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

fn read_sources(state: &AppState) -> statement_pipeline::Result<Vec<SourceResponse>> {
    let landing = state
        .landing
        .lock()
        .map_err(|_| statement_pipeline::PipelineError::StoreUnavailable("landing store lock poisoned".into()))?;
    let ledger = state
        .ledger
        .lock()
        .map_err(|_| statement_pipeline::PipelineError::StoreUnavailable("ledger store lock poisoned".into()))?;

    landing
        .sources()?
        .iter()
        .map(|source| SourceCursor::read(source, &*landing, &*ledger).map(SourceResponse::from))
        .collect()
}

/// GET /api/sources - Watermarks for every landed source
async fn get_sources(State(state): State<AppState>) -> impl IntoResponse {
    match read_sources(&state) {
        Ok(sources) => (StatusCode::OK, Json(ApiResponse::ok(sources))).into_response(),
        Err(e) => {
            error!(error = %e, "failed to read source watermarks");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<Vec<SourceResponse>>::err(e.to_string())),
            )
                .into_response()
        }
    }
}

/// GET /api/sources/:source/transactions - Ledger rows of one source, by line
async fn get_source_transactions(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> impl IntoResponse {
    // Decode URL-encoded filename
    let source = urlencoding::decode(&source)
        .map(|s| s.into_owned())
        .unwrap_or(source);

    let rows = match state.ledger.lock() {
        Ok(ledger) => ledger.transactions_for(&source),
        Err(_) => Err(statement_pipeline::PipelineError::StoreUnavailable(
            "ledger store lock poisoned".into(),
        )),
    };

    match rows {
        Ok(rows) => (StatusCode::OK, Json(ApiResponse::ok(rows))).into_response(),
        Err(e) => {
            error!(source = %source, error = %e, "failed to read transactions");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<Vec<TransactionRecord>>::err(e.to_string())),
            )
                .into_response()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LogConfig::from_env()?)?;

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    config.validate().context("Invalid pipeline configuration")?;
    let landing = SqliteLandingStore::open(&config.landing_db)
        .with_context(|| format!("Failed to open {}", config.landing_db.display()))?;
    let ledger = SqliteLedgerStore::open(&config.ledger_db)
        .with_context(|| format!("Failed to open {}", config.ledger_db.display()))?;

    let state = AppState {
        landing: Arc::new(Mutex::new(landing)),
        ledger: Arc::new(Mutex::new(ledger)),
    };

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/sources", get(get_sources))
        .route("/api/sources/:source/transactions", get(get_source_transactions))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(addr = %addr, "statement API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
