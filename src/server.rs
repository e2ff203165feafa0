use std::{net::SocketAddr, sync::Arc};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::error::ApiError;
use crate::relay::sse_events;
use crate::session::{ChatRequest, MISSING_MESSAGES};
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    agent: Arc<OnceCell<Arc<Agent>>>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(settings: Settings, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            settings: Arc::new(settings),
            agent: Arc::new(OnceCell::new()),
            metrics,
            started_at: Utc::now(),
        }
    }

    /// State with an agent already in place; nothing is built on first use.
    #[cfg(test)]
    pub fn with_agent(settings: Settings, agent: Arc<Agent>) -> Self {
        Self {
            agent: Arc::new(OnceCell::new_with(Some(agent))),
            ..Self::new(settings, None)
        }
    }

    /// The shared agent, built on first use. Concurrent first requests wait
    /// on the same initialization.
    async fn agent(&self) -> Result<Arc<Agent>, ApiError> {
        self.agent
            .get_or_try_init(|| async {
                let agent = Agent::from_settings(&self.settings)?;
                anyhow::Ok(Arc::new(agent))
            })
            .await
            .cloned()
            .map_err(|e| ApiError::Internal(format!("could not build agent: {e:#}")))
    }
}

async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    metrics::counter!("chat_requests_total").increment(1);
    let history = match body {
        Ok(Json(req)) => req.into_history()?,
        Err(rejection) => {
            warn!(error = %rejection, "unreadable chat request body");
            return Err(ApiError::Validation(MISSING_MESSAGES.into()));
        }
    };

    let agent = state.agent().await?;
    let run = agent.run(history);
    info!(run_id = %run.run_id, "chat stream opened");
    Ok(Sse::new(sse_events(run)).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    started_at: DateTime<Utc>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
    })
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
