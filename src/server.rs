//! HTTP surface: POST /chat and GET /health

use crate::config::{Config, API_KEY_ENV};
use crate::dataset::Table;
use crate::engine::{ChatReply, EngineOptions, PayloadRow, QueryEngine};
use crate::error::Error;
use crate::oracle::{AnthropicOracle, Oracle};
use crate::session::SessionStore;
use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<PayloadRow>>,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    rows: usize,
}

/// Shared server state. The engine is absent when the oracle credential is
/// missing; the server still starts and /chat reports the configuration
/// error per request.
pub struct AppState {
    engine: Option<QueryEngine>,
    sessions: SessionStore,
    base_rows: usize,
}

impl AppState {
    pub fn new(config: &Config, base: Arc<Table>) -> Self {
        let engine = match &config.api_key {
            Some(key) => match build_engine(config, key, Arc::clone(&base)) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!("failed to build query engine: {e}");
                    None
                }
            },
            None => {
                warn!("{API_KEY_ENV} not set; /chat will fail until it is provided");
                None
            }
        };
        let sessions = SessionStore::new(
            Arc::clone(&base),
            Duration::from_secs(config.session_timeout_secs),
            config.history_cap,
        );
        Self {
            engine,
            sessions,
            base_rows: base.row_count(),
        }
    }

    /// Test builds inject scripted oracles directly.
    pub fn with_engine(config: &Config, base: Arc<Table>, engine: QueryEngine) -> Self {
        let sessions = SessionStore::new(
            Arc::clone(&base),
            Duration::from_secs(config.session_timeout_secs),
            config.history_cap,
        );
        Self {
            engine: Some(engine),
            sessions,
            base_rows: base.row_count(),
        }
    }
}

fn build_engine(config: &Config, api_key: &str, base: Arc<Table>) -> crate::error::Result<QueryEngine> {
    let code_oracle: Arc<dyn Oracle> = Arc::new(AnthropicOracle::new(
        api_key.to_string(),
        config.code_model.clone(),
    )?);
    let prose_oracle: Arc<dyn Oracle> = Arc::new(AnthropicOracle::new(
        api_key.to_string(),
        config.prose_model.clone(),
    )?);
    Ok(QueryEngine::new(
        code_oracle,
        prose_oracle,
        base,
        EngineOptions {
            max_retries: config.max_retries,
            table_row_cap: config.table_row_cap,
            preview_rows: config.preview_rows,
            ..EngineOptions::default()
        },
    ))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let app = build_router(state);
    info!("starting chat server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rows: state.base_rows,
    })
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let engine = state.engine.as_ref().ok_or((
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{API_KEY_ENV} not set"),
    ))?;

    let (session_id, session) = state.sessions.resolve(request.session_id.as_deref()).await;

    // Exclusive critical section for this session's read-modify-write;
    // requests against other sessions proceed in parallel.
    let mut session = session.lock().await;

    match engine.answer(&mut session, &request.message).await {
        Ok(ChatReply { response, table }) => Ok(Json(ChatResponse {
            response,
            table,
            session_id,
        })),
        Err(e @ Error::OracleUnavailable(_)) => {
            warn!(session_id = %session_id, "chat failed: {e}");
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => {
            warn!(session_id = %session_id, "chat failed: {e}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
