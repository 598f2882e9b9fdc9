use sqlx::{FromRow, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::{Question, QuestionSet};

#[derive(FromRow)]
struct QuestionSetRow {
    exam_id: String,
    title: String,
    duration_seconds: Option<i64>,
    passing_score: f64,
    available_from: Option<PrimitiveDateTime>,
    available_until: Option<PrimitiveDateTime>,
}

pub(crate) async fn find(pool: &PgPool, exam_id: &str) -> Result<Option<QuestionSet>, sqlx::Error> {
    let Some(row) = sqlx::query_as::<_, QuestionSetRow>(
        "SELECT exam_id, title, duration_seconds, passing_score, available_from, available_until
         FROM question_sets WHERE exam_id = $1",
    )
    .bind(exam_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let questions = sqlx::query_as::<_, Question>(
        "SELECT id, answer_key, points FROM questions
         WHERE exam_id = $1
         ORDER BY position, id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(QuestionSet {
        exam_id: row.exam_id,
        title: row.title,
        duration_seconds: row.duration_seconds,
        passing_score: row.passing_score,
        available_from: row.available_from,
        available_until: row.available_until,
        questions,
    }))
}
