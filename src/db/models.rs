use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{JobStatus, SessionState};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamSession {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exam_id: String,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) deadline: PrimitiveDateTime,
    pub(crate) state: SessionState,
    pub(crate) answers: Json<HashMap<String, String>>,
    pub(crate) attempt_token: Option<String>,
    pub(crate) ended_at: Option<PrimitiveDateTime>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct DeadlineEntry {
    pub(crate) session_id: String,
    pub(crate) fires_at: PrimitiveDateTime,
    pub(crate) seq: i64,
    pub(crate) fired: bool,
    pub(crate) fired_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradingJob {
    pub(crate) attempt_token: String,
    pub(crate) session_id: String,
    pub(crate) status: JobStatus,
    pub(crate) attempts: i32,
    pub(crate) enqueued_at: PrimitiveDateTime,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) last_error: Option<String>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionOutcome {
    pub(crate) question_id: String,
    pub(crate) answer: Option<String>,
    pub(crate) correct: bool,
    pub(crate) points_awarded: f64,
    pub(crate) points_possible: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradeResult {
    pub(crate) session_id: String,
    pub(crate) score: f64,
    pub(crate) earned_points: f64,
    pub(crate) total_points: f64,
    pub(crate) passed: bool,
    pub(crate) per_question_breakdown: Json<Vec<QuestionOutcome>>,
    pub(crate) time_taken_seconds: i64,
    pub(crate) graded_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) answer_key: String,
    pub(crate) points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QuestionSet {
    pub(crate) exam_id: String,
    pub(crate) title: String,
    pub(crate) duration_seconds: Option<i64>,
    pub(crate) passing_score: f64,
    pub(crate) available_from: Option<PrimitiveDateTime>,
    pub(crate) available_until: Option<PrimitiveDateTime>,
    pub(crate) questions: Vec<Question>,
}

impl ExamSession {
    pub(crate) fn answers(&self) -> &HashMap<String, String> {
        &self.answers.0
    }
}

impl QuestionSet {
    pub(crate) fn is_available_at(&self, now: PrimitiveDateTime) -> bool {
        if self.available_from.is_some_and(|from| from > now) {
            return false;
        }
        if self.available_until.is_some_and(|until| until < now) {
            return false;
        }
        true
    }
}
