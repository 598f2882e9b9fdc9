use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::GradingJob;
use crate::db::types::JobStatus;

const COLUMNS: &str =
    "attempt_token, session_id, status, attempts, enqueued_at, started_at, last_error, updated_at";

pub(crate) async fn create(pool: &PgPool, job: &GradingJob) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO grading_jobs (
            attempt_token, session_id, status, attempts,
            enqueued_at, started_at, last_error, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        ON CONFLICT DO NOTHING",
    )
    .bind(&job.attempt_token)
    .bind(&job.session_id)
    .bind(job.status)
    .bind(job.attempts)
    .bind(job.enqueued_at)
    .bind(job.started_at)
    .bind(&job.last_error)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn find(
    pool: &PgPool,
    attempt_token: &str,
) -> Result<Option<GradingJob>, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "SELECT {COLUMNS} FROM grading_jobs WHERE attempt_token = $1"
    ))
    .bind(attempt_token)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn transition(
    pool: &PgPool,
    attempt_token: &str,
    from: JobStatus,
    to: JobStatus,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE grading_jobs
         SET status = $3,
             started_at = CASE WHEN $3 = 'in_progress'::gradingjobstatus THEN $4 ELSE started_at END,
             updated_at = $4
         WHERE attempt_token = $1 AND status = $2",
    )
    .bind(attempt_token)
    .bind(from)
    .bind(to)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn record_error(
    pool: &PgPool,
    attempt_token: &str,
    error: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE grading_jobs SET last_error = $2, updated_at = $3 WHERE attempt_token = $1",
    )
    .bind(attempt_token)
    .bind(error)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns the reaped rows after the update, split later by their new status.
pub(crate) async fn reap_stale(
    pool: &PgPool,
    stale_before: PrimitiveDateTime,
    max_attempts: i32,
    now: PrimitiveDateTime,
) -> Result<Vec<GradingJob>, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "WITH stale AS (
            SELECT attempt_token FROM grading_jobs
            WHERE status = 'in_progress'::gradingjobstatus
              AND started_at < $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE grading_jobs j
        SET attempts = j.attempts + 1,
            status = CASE
                WHEN j.attempts + 1 >= $2 THEN 'failed'::gradingjobstatus
                ELSE 'pending'::gradingjobstatus
            END,
            started_at = NULL,
            last_error = COALESCE(j.last_error, 'in-progress timeout exceeded'),
            updated_at = $3
        FROM stale
        WHERE j.attempt_token = stale.attempt_token
          AND j.status = 'in_progress'::gradingjobstatus
        RETURNING {}",
        prefixed("j")
    ))
    .bind(stale_before)
    .bind(max_attempts)
    .bind(now)
    .fetch_all(pool)
    .await
}

pub(crate) async fn claim_undelivered(
    pool: &PgPool,
    stale_before: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<Vec<GradingJob>, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "WITH due AS (
            SELECT attempt_token FROM grading_jobs
            WHERE status = 'pending'::gradingjobstatus
              AND updated_at < $1
            ORDER BY updated_at
            LIMIT 500
            FOR UPDATE SKIP LOCKED
        )
        UPDATE grading_jobs j
        SET updated_at = $2
        FROM due
        WHERE j.attempt_token = due.attempt_token
        RETURNING {}",
        prefixed("j")
    ))
    .bind(stale_before)
    .bind(now)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_failed(pool: &PgPool, limit: i64) -> Result<Vec<GradingJob>, sqlx::Error> {
    sqlx::query_as::<_, GradingJob>(&format!(
        "SELECT {COLUMNS} FROM grading_jobs
         WHERE status = 'failed'::gradingjobstatus
         ORDER BY updated_at DESC
         LIMIT $1"
    ))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await
}

pub(crate) async fn reset_failed(
    pool: &PgPool,
    attempt_token: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE grading_jobs
         SET status = 'pending'::gradingjobstatus,
             attempts = 0,
             started_at = NULL,
             last_error = NULL,
             updated_at = $2
         WHERE attempt_token = $1 AND status = 'failed'::gradingjobstatus",
    )
    .bind(attempt_token)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn prefixed(alias: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}
