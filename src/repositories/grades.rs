use sqlx::PgPool;

use crate::db::models::GradeResult;

const COLUMNS: &str = "session_id, score, earned_points, total_points, passed, \
    per_question_breakdown, time_taken_seconds, graded_at";

pub(crate) async fn insert(pool: &PgPool, result: &GradeResult) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT INTO grade_results (
            session_id, score, earned_points, total_points, passed,
            per_question_breakdown, time_taken_seconds, graded_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        ON CONFLICT (session_id) DO NOTHING",
    )
    .bind(&result.session_id)
    .bind(result.score)
    .bind(result.earned_points)
    .bind(result.total_points)
    .bind(result.passed)
    .bind(&result.per_question_breakdown)
    .bind(result.time_taken_seconds)
    .bind(result.graded_at)
    .execute(pool)
    .await?;

    Ok(inserted.rows_affected() > 0)
}

pub(crate) async fn find(
    pool: &PgPool,
    session_id: &str,
) -> Result<Option<GradeResult>, sqlx::Error> {
    sqlx::query_as::<_, GradeResult>(&format!(
        "SELECT {COLUMNS} FROM grade_results WHERE session_id = $1"
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await
}
