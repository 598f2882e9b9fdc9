use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::DeadlineEntry;

const COLUMNS: &str = "session_id, fires_at, seq, fired, fired_at";

pub(crate) async fn insert(
    executor: impl sqlx::PgExecutor<'_>,
    session_id: &str,
    fires_at: PrimitiveDateTime,
) -> Result<DeadlineEntry, sqlx::Error> {
    sqlx::query_as::<_, DeadlineEntry>(&format!(
        "INSERT INTO session_deadlines (session_id, fires_at, fired)
         VALUES ($1, $2, FALSE)
         RETURNING {COLUMNS}"
    ))
    .bind(session_id)
    .bind(fires_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_unfired(pool: &PgPool) -> Result<Vec<DeadlineEntry>, sqlx::Error> {
    sqlx::query_as::<_, DeadlineEntry>(&format!(
        "SELECT {COLUMNS} FROM session_deadlines
         WHERE NOT fired
         ORDER BY fires_at, seq"
    ))
    .fetch_all(pool)
    .await
}

pub(crate) async fn mark_fired(
    pool: &PgPool,
    session_id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE session_deadlines
         SET fired = TRUE, fired_at = $2
         WHERE session_id = $1 AND NOT fired",
    )
    .bind(session_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
