use anyhow::{Context, Result};

use crate::core::errors::ExamError;
use crate::core::state::AppState;
use crate::core::time::sub_std;

const ORPHAN_BATCH: i64 = 200;

/// InProgress jobs older than the liveness timeout go back to Pending (and are
/// republished) or, once out of attempts, to Failed.
pub(crate) async fn reap_stale_jobs(state: &AppState) -> Result<()> {
    let now = state.clock().now();
    let grading = state.settings().grading();
    let stale_before = sub_std(now, grading.in_progress_timeout());
    let max_attempts = i32::try_from(grading.max_attempts).unwrap_or(i32::MAX);

    let outcome = state
        .store()
        .reap_stale_jobs(stale_before, max_attempts, now)
        .await
        .context("Failed to reap stale grading jobs")?;

    for job in &outcome.failed {
        let Some(err) = ExamError::grading_failed(job) else {
            continue;
        };
        tracing::error!(
            session_id = %job.session_id,
            error = %err,
            last_error = job.last_error.as_deref().unwrap_or("-"),
            "Grading job failed permanently"
        );
    }

    let mut republished = 0;
    for job in &outcome.requeued {
        match state.dispatcher().publish_grade(&job.session_id, &job.attempt_token).await {
            Ok(()) => republished += 1,
            Err(err) => tracing::warn!(
                attempt_token = %job.attempt_token,
                error = %err,
                "Failed to republish reaped job; left for undelivered sweep"
            ),
        }
    }

    if !outcome.requeued.is_empty() || !outcome.failed.is_empty() {
        tracing::info!(
            requeued = outcome.requeued.len(),
            republished,
            failed = outcome.failed.len(),
            "Reaped stale grading jobs"
        );
    }
    metrics::counter!("grading_jobs_reaped_total").increment(outcome.requeued.len() as u64);
    metrics::counter!("grading_jobs_failed_permanent_total").increment(outcome.failed.len() as u64);

    Ok(())
}

/// Pending jobs whose message was never published or was lost.
pub(crate) async fn republish_undelivered_jobs(state: &AppState) -> Result<()> {
    let now = state.clock().now();
    let stale_before = sub_std(now, state.settings().grading().pending_republish_after());

    let jobs = state
        .store()
        .claim_undelivered_jobs(stale_before, now)
        .await
        .context("Failed to fetch undelivered grading jobs")?;

    for job in &jobs {
        state
            .dispatcher()
            .publish_grade(&job.session_id, &job.attempt_token)
            .await
            .context("Failed to republish grading job")?;
    }

    if !jobs.is_empty() {
        tracing::info!(republished = jobs.len(), "Republished undelivered grading jobs");
    }
    Ok(())
}

/// Submitted or Expired sessions whose job was never created.
pub(crate) async fn enqueue_orphaned_sessions(state: &AppState) -> Result<()> {
    let sessions = state
        .store()
        .list_sessions_without_job(ORPHAN_BATCH)
        .await
        .context("Failed to fetch sessions without grading job")?;

    let mut enqueued = 0;
    for session in &sessions {
        let Some(token) = session.attempt_token.as_deref() else {
            continue;
        };
        state
            .dispatcher()
            .enqueue(&session.id, token)
            .await
            .context("Failed to enqueue orphaned session")?;
        enqueued += 1;
    }

    if enqueued > 0 {
        tracing::warn!(enqueued, "Enqueued grading for sessions without a job");
    }
    Ok(())
}

/// Sessions whose result exists but whose Graded transition was lost.
pub(crate) async fn finalize_graded_sessions(state: &AppState) -> Result<()> {
    let finalized = state
        .store()
        .finalize_graded_sessions(state.clock().now())
        .await
        .context("Failed to finalize graded sessions")?;

    if finalized > 0 {
        tracing::info!(finalized, "Finalized graded sessions");
    }
    Ok(())
}

/// One full pass; each step runs even if an earlier one failed.
pub(crate) async fn run_pass(state: &AppState) {
    if let Err(err) = reap_stale_jobs(state).await {
        tracing::error!(error = %err, "reap_stale_jobs failed");
    }
    if let Err(err) = enqueue_orphaned_sessions(state).await {
        tracing::error!(error = %err, "enqueue_orphaned_sessions failed");
    }
    if let Err(err) = republish_undelivered_jobs(state).await {
        tracing::error!(error = %err, "republish_undelivered_jobs failed");
    }
    if let Err(err) = finalize_graded_sessions(state).await {
        tracing::error!(error = %err, "finalize_graded_sessions failed");
    }
}
