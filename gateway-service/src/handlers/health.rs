use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::services::{AccountStore, DecisionCache, JobQueue};

#[derive(Clone)]
pub struct OperationsState {
    pub store: Arc<dyn AccountStore>,
    pub cache: Arc<dyn DecisionCache>,
    pub jobs: Arc<dyn JobQueue>,
}

/// Readiness check; answers as soon as the listener is up.
pub async fn readiness_check() -> &'static str {
    "ready"
}

/// Liveness check covering the record store, the decision cache and the job queue.
pub async fn health_check(State(state): State<OperationsState>) -> impl IntoResponse {
    let database = match state.store.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "down"
        }
    };

    let cache = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Decision cache health check failed");
            "down"
        }
    };

    let queue = match state.jobs.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Job queue health check failed");
            "down"
        }
    };

    let healthy = database == "up" && cache == "up" && queue == "up";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": "gateway-service",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "database": database,
                "cache": cache,
                "queue": queue
            }
        })),
    )
}
