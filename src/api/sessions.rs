use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::db::models::ExamSession;
use crate::schemas::session::{
    GradeResultResponse, RecordAnswerRequest, SessionResponse, StartSessionRequest,
    SubmitSessionRequest,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_session))
        .route("/:session_id", get(get_session))
        .route("/:session_id/answers/:question_id", put(record_answer))
        .route("/:session_id/submit", post(submit_session))
        .route("/:session_id/result", get(get_result))
}

async fn start_session(
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = state.sessions().start_session(&user_id, payload.exam_id.trim()).await?;
    let now = state.clock().now();
    Ok((StatusCode::CREATED, Json(SessionResponse::from_session(session, now))))
}

async fn get_session(
    Path(session_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = owned_session(&state, &session_id, &user_id).await?;
    Ok(Json(SessionResponse::from_session(session, state.clock().now())))
}

async fn record_answer(
    Path((session_id, question_id)): Path<(String, String)>,
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<RecordAnswerRequest>,
) -> Result<StatusCode, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    owned_session(&state, &session_id, &user_id).await?;

    state.sessions().record_answer(&session_id, &question_id, &payload.answer).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_session(
    Path(session_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<SubmitSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    owned_session(&state, &session_id, &user_id).await?;

    let session = state.sessions().submit_session(&session_id, &payload.attempt_token).await?;
    Ok((StatusCode::ACCEPTED, Json(SessionResponse::from_session(session, state.clock().now()))))
}

async fn get_result(
    Path(session_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<GradeResultResponse>, ApiError> {
    owned_session(&state, &session_id, &user_id).await?;
    let result = state.sessions().get_result(&session_id).await?;
    Ok(Json(result.into()))
}

/// Another user's session is reported as missing.
async fn owned_session(
    state: &AppState,
    session_id: &str,
    user_id: &str,
) -> Result<ExamSession, ApiError> {
    let session = state.sessions().get_session(session_id).await?;
    if session.user_id != user_id {
        return Err(ApiError::NotFound(format!("session {session_id} not found")));
    }
    Ok(session)
}
