use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::collections::HashMap;

use crate::core::metrics;
use crate::core::redis::RedisHealth;
use crate::core::state::AppState;
use crate::schemas::{HealthResponse, RootResponse};

const SERVICE_NAME: &str = "quizmaster-api";

pub(crate) async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let response = RootResponse {
        message: state.settings().api().project_name.clone(),
        version: state.settings().api().version.clone(),
        api_prefix: state.settings().api().api_v1_str.clone(),
    };

    Json(response)
}

/// Liveness: the process is up and serving.
pub(crate) async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: SERVICE_NAME.to_string(),
        status: "healthy".to_string(),
        components: HashMap::new(),
    })
}

/// Readiness: store and queue both answer.
pub(crate) async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut ready = true;
    let mut components = HashMap::new();

    match state.store().ping().await {
        Ok(()) => {
            components.insert("database".to_string(), "healthy".to_string());
        }
        Err(err) => {
            components.insert("database".to_string(), format!("unhealthy: {err}"));
            ready = false;
        }
    }

    match state.redis() {
        Some(redis) => match redis.health().await {
            RedisHealth::Healthy => {
                components.insert("redis".to_string(), "healthy".to_string());
            }
            RedisHealth::Disconnected => {
                components.insert("redis".to_string(), "disconnected".to_string());
                ready = false;
            }
            RedisHealth::Unhealthy(error) => {
                components.insert("redis".to_string(), format!("unhealthy: {error}"));
                ready = false;
            }
        },
        None => match state.queue().ping().await {
            Ok(()) => {
                components.insert("queue".to_string(), "healthy".to_string());
            }
            Err(err) => {
                components.insert("queue".to_string(), format!("unhealthy: {err}"));
                ready = false;
            }
        },
    }

    let (status_code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status_code,
        Json(HealthResponse {
            service: SERVICE_NAME.to_string(),
            status: status.to_string(),
            components,
        }),
    )
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.settings().telemetry().prometheus_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match metrics::render() {
        Some(body) => ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
