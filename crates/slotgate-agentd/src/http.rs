//! Read-only HTTP surface: Prometheus metrics, usage and counter health.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use slotgate_core::{error::CoreError, reconciler::Reconciler, tracker::{SlotTracker, TrackerError}};
use slotgate_model::{Diagnosis, Health, Usage};
use slotgate_prometheus::{Encoder, PrometheusMetrics, TextEncoder};
use thiserror::Error;
use tracing::{error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to encode metrics: {0}")]
    Encode(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self, "request failed");
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub tracker: SlotTracker,
    pub reconciler: Arc<Reconciler>,
    pub metrics: PrometheusMetrics,
}

/// Routes:
/// - GET /metrics - Prometheus text exposition
/// - GET /usage   - utilization snapshot
/// - GET /health  - counter diagnosis; 503 unless healthy
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/usage", get(usage))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "http listener started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("http listener shutting down");
        })
        .await?;
    Ok(())
}

fn render_metrics(metrics: &PrometheusMetrics) -> Result<Vec<u8>, ApiError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metrics.gather(), &mut buffer)
        .map_err(|e| ApiError::Encode(e.to_string()))?;
    Ok(buffer)
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = render_metrics(&state.metrics)?;
    Ok(([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body))
}

async fn usage(State(state): State<AppState>) -> Result<Json<Usage>, ApiError> {
    Ok(Json(state.tracker.usage().await?))
}

async fn health(State(state): State<AppState>) -> Result<(StatusCode, Json<Diagnosis>), ApiError> {
    let diagnosis = state.reconciler.diagnose().await?;
    let status = match diagnosis.health {
        Health::Healthy => StatusCode::OK,
        Health::Stuck | Health::Drifting => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(diagnosis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgate_core::{
        runner::StaticRunner,
        settings::SettingsProvider,
        store::{MemorySlotStore, SlotStore},
    };
    use slotgate_model::GateSettings;
    use time::OffsetDateTime;

    fn state() -> (AppState, Arc<MemorySlotStore>) {
        let store = Arc::new(MemorySlotStore::new());
        let settings = SettingsProvider::fixed(GateSettings::default());
        let metrics = PrometheusMetrics::new().unwrap();
        let tracker = SlotTracker::new(store.clone(), settings.clone())
            .with_metrics(Arc::new(metrics.clone()));
        let reconciler = Reconciler::new(store.clone(), Arc::new(StaticRunner::new(0)), settings);
        let state = AppState {
            tracker,
            reconciler: Arc::new(reconciler),
            metrics,
        };
        (state, store)
    }

    #[tokio::test]
    async fn usage_reflects_the_store() {
        let (state, store) = state();
        store
            .try_increment_in_flight(150, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let Json(usage) = usage(State(state)).await.unwrap();
        assert_eq!(usage.in_flight, 1);
        assert_eq!(usage.max_in_flight, 150);
        assert_eq!(usage.available, 149);
    }

    #[tokio::test]
    async fn health_is_unavailable_when_stuck() {
        let (state, store) = state();
        let (status, Json(d)) = health(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(d.health, Health::Healthy);

        store
            .try_increment_in_flight(150, OffsetDateTime::now_utc())
            .await
            .unwrap();
        let (status, Json(d)) = health(State(state)).await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(d.health, Health::Stuck);
    }

    #[tokio::test]
    async fn metrics_expose_the_gauge() {
        let (state, _) = state();
        usage(State(state.clone())).await.unwrap();

        let text = String::from_utf8(render_metrics(&state.metrics).unwrap()).unwrap();
        assert!(text.contains("slotgate_in_flight 0"), "{text}");

        let resp = metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
