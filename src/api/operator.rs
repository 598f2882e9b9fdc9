use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentOperator;
use crate::core::state::AppState;
use crate::schemas::session::{FailedJobsQuery, GradingJobResponse};

const DEFAULT_LIMIT: i64 = 100;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/failed-jobs", get(list_failed_jobs))
        .route("/failed-jobs/:attempt_token/retry", post(retry_failed_job))
}

async fn list_failed_jobs(
    CurrentOperator(_operator): CurrentOperator,
    State(state): State<AppState>,
    Query(query): Query<FailedJobsQuery>,
) -> Result<Json<Vec<GradingJobResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 1000);
    let jobs = state.dispatcher().list_failed(limit).await?;
    Ok(Json(jobs.into_iter().map(GradingJobResponse::from).collect()))
}

async fn retry_failed_job(
    Path(attempt_token): Path<String>,
    CurrentOperator(operator): CurrentOperator,
    State(state): State<AppState>,
) -> Result<Json<GradingJobResponse>, ApiError> {
    let job = state.dispatcher().retry_failed(&attempt_token).await?;
    tracing::info!(operator, attempt_token, "Operator retried failed grading job");
    Ok(Json(job.into()))
}
