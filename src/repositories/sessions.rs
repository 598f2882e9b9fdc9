use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{DeadlineEntry, ExamSession};
use crate::db::types::SessionState;

pub(crate) const COLUMNS: &str = "\
    id, user_id, exam_id, started_at, deadline, state, answers, \
    attempt_token, ended_at, graded_at, created_at, updated_at";

pub(crate) enum CreateOutcome {
    Created(DeadlineEntry),
    ActiveExists,
}

/// Inserts the session and its deadline entry in one transaction.
pub(crate) async fn create_with_deadline(
    pool: &PgPool,
    session: &ExamSession,
) -> Result<CreateOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO exam_sessions (
            id, user_id, exam_id, started_at, deadline, state, answers,
            attempt_token, ended_at, graded_at, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.exam_id)
    .bind(session.started_at)
    .bind(session.deadline)
    .bind(session.state)
    .bind(&session.answers)
    .bind(&session.attempt_token)
    .bind(session.ended_at)
    .bind(session.graded_at)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            tx.rollback().await?;
            return Ok(CreateOutcome::ActiveExists);
        }
        Err(err) => return Err(err),
    }

    let entry = super::deadlines::insert(&mut *tx, &session.id, session.deadline).await?;
    tx.commit().await?;

    Ok(CreateOutcome::Created(entry))
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!("SELECT {COLUMNS} FROM exam_sessions WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn exists(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM exam_sessions WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Moves the row through a lifecycle transition only while it is still in `expected` state.
/// `answers` is owned by `upsert_answer` and never rewritten here.
pub(crate) async fn update_if_state(
    pool: &PgPool,
    session: &ExamSession,
    expected: SessionState,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions
         SET state = $1,
             attempt_token = $2,
             ended_at = $3,
             graded_at = $4,
             updated_at = $5
         WHERE id = $6 AND state = $7",
    )
    .bind(session.state)
    .bind(&session.attempt_token)
    .bind(session.ended_at)
    .bind(session.graded_at)
    .bind(session.updated_at)
    .bind(&session.id)
    .bind(expected)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn upsert_answer(
    pool: &PgPool,
    session_id: &str,
    question_id: &str,
    answer: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions
         SET answers = jsonb_set(answers, ARRAY[$2::text], to_jsonb($3::text), true),
             updated_at = $4
         WHERE id = $1 AND state = $5 AND deadline > $4",
    )
    .bind(session_id)
    .bind(question_id)
    .bind(answer)
    .bind(now)
    .bind(SessionState::Active)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_terminal_without_job(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<ExamSession>, sqlx::Error> {
    sqlx::query_as::<_, ExamSession>(&format!(
        "SELECT {COLUMNS} FROM exam_sessions s
         WHERE s.state IN ($1, $2)
           AND s.attempt_token IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM grading_jobs j WHERE j.session_id = s.id)
         ORDER BY s.updated_at
         LIMIT $3"
    ))
    .bind(SessionState::Submitted)
    .bind(SessionState::Expired)
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await
}

pub(crate) async fn mark_graded_where_result_exists(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exam_sessions s
         SET state = $1,
             graded_at = r.graded_at,
             updated_at = $2
         FROM grade_results r
         WHERE r.session_id = s.id
           AND s.state IN ($3, $4)",
    )
    .bind(SessionState::Graded)
    .bind(now)
    .bind(SessionState::Submitted)
    .bind(SessionState::Expired)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
