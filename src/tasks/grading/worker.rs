use std::time::Instant;

use crate::core::errors::ExamError;
use crate::core::state::AppState;
use crate::db::models::GradeResult;
use crate::db::types::{JobStatus, SessionState};
use crate::queue::{Delivery, QueueMessage};
use crate::services::scoring::grade_session;

#[derive(Debug)]
pub(crate) enum GradeOutcome {
    Graded(GradeResult),
    /// Nothing was written: the job is unknown, finished, or claimed by another worker.
    Skipped(&'static str),
}

/// Processes one delivery and acks it. Grading failures leave the job
/// InProgress for the reaper, so the message is acked either way.
pub(crate) async fn handle_delivery(state: &AppState, delivery: Delivery) {
    match &delivery.message {
        QueueMessage::Grade { session_id, attempt_token } => {
            match grade_job(state, session_id, attempt_token).await {
                Ok(GradeOutcome::Graded(result)) => {
                    tracing::info!(
                        session_id,
                        attempt_token,
                        score = result.score,
                        passed = result.passed,
                        "Session graded"
                    );
                }
                Ok(GradeOutcome::Skipped(reason)) => {
                    tracing::debug!(session_id, attempt_token, reason, "Grade message skipped");
                }
                Err(err) => {
                    tracing::error!(session_id, attempt_token, error = %err, "Grading failed");
                }
            }
        }
        QueueMessage::NotifyGraded { session_id, user_id, exam_id, score } => {
            if let Err(err) = state.notifier().notify_graded(user_id, exam_id, *score).await {
                tracing::warn!(session_id, user_id, exam_id, error = %err, "Grade notification failed");
            }
        }
    }

    if let Err(err) = state.queue().ack(&delivery).await {
        tracing::warn!(kind = delivery.message.kind(), error = %err, "Failed to ack queue message");
    }
}

/// Claim → score → persist → Done → Graded. Only a won claim has side effects,
/// and only the completing claim publishes the grade notification.
pub(crate) async fn grade_job(
    state: &AppState,
    session_id: &str,
    attempt_token: &str,
) -> Result<GradeOutcome, ExamError> {
    let store = state.store();

    let Some(job) = store.load_job(attempt_token).await? else {
        return Ok(GradeOutcome::Skipped("unknown job"));
    };
    if matches!(job.status, JobStatus::Done | JobStatus::Failed) {
        return Ok(GradeOutcome::Skipped("job already finished"));
    }
    if job.session_id != session_id {
        tracing::warn!(
            session_id,
            job_session_id = %job.session_id,
            attempt_token,
            "Grade message names a different session than its job"
        );
    }

    let claimed = store
        .transition_job(attempt_token, JobStatus::Pending, JobStatus::InProgress, state.clock().now())
        .await?;
    if !claimed {
        return Ok(GradeOutcome::Skipped("job claimed elsewhere"));
    }

    let started = Instant::now();
    match score_and_record(state, &job.session_id, attempt_token).await {
        Ok(result) => {
            metrics::counter!("grading_jobs_total", "status" => "success").increment(1);
            metrics::histogram!("grading_duration_seconds").record(started.elapsed().as_secs_f64());
            Ok(GradeOutcome::Graded(result))
        }
        Err(err) => {
            metrics::counter!("grading_jobs_total", "status" => "error").increment(1);
            if let Err(record_err) =
                store.record_job_error(attempt_token, &err.to_string(), state.clock().now()).await
            {
                tracing::warn!(attempt_token, error = %record_err, "Failed to record grading error");
            }
            Err(err)
        }
    }
}

async fn score_and_record(
    state: &AppState,
    session_id: &str,
    attempt_token: &str,
) -> Result<GradeResult, ExamError> {
    let store = state.store();
    let session = store
        .load_session(session_id)
        .await?
        .ok_or_else(|| ExamError::NotFound(format!("session {session_id}")))?;

    let result = match store.load_grade_result(session_id).await? {
        Some(existing) => existing,
        None => {
            let set = store
                .load_question_set(&session.exam_id)
                .await?
                .ok_or_else(|| ExamError::NotFound(format!("exam {}", session.exam_id)))?;
            let result = grade_session(&session, &set, state.clock().now());
            if store.save_grade_result(&result).await? {
                result
            } else {
                store.load_grade_result(session_id).await?.ok_or_else(|| {
                    ExamError::ConcurrentModification(format!("result for session {session_id}"))
                })?
            }
        }
    };

    let now = state.clock().now();
    let completed =
        store.transition_job(attempt_token, JobStatus::InProgress, JobStatus::Done, now).await?;
    if !completed {
        tracing::warn!(session_id, attempt_token, "Job left InProgress before completion");
    }

    if session.state.awaits_grading() {
        let previous = session.state;
        let mut graded = session.clone();
        graded.state = SessionState::Graded;
        graded.graded_at = Some(result.graded_at);
        graded.updated_at = now;
        if let Err(err) = store.save_session(&graded, previous).await {
            tracing::warn!(session_id, error = %err, "Graded transition deferred to maintenance");
        }
    }

    // only the worker that moved the job to Done announces the grade
    if !completed {
        return Ok(result);
    }

    let notify = QueueMessage::NotifyGraded {
        session_id: session.id.clone(),
        user_id: session.user_id.clone(),
        exam_id: session.exam_id.clone(),
        score: result.score,
    };
    if let Err(err) = state.queue().publish(&notify).await {
        tracing::warn!(session_id, error = %err, "Failed to publish grade notification");
    }

    Ok(result)
}
