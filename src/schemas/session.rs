use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use validator::Validate;

use crate::core::errors::ExamError;
use crate::core::time::{format_primitive, until};
use crate::db::models::{ExamSession, GradeResult, GradingJob, QuestionOutcome};
use crate::db::types::{JobStatus, SessionState};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct StartSessionRequest {
    #[serde(alias = "examId")]
    #[validate(length(min = 1, max = 128, message = "exam_id must be 1-128 characters"))]
    pub(crate) exam_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RecordAnswerRequest {
    #[validate(length(max = 10000, message = "answer is too long"))]
    pub(crate) answer: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SubmitSessionRequest {
    #[serde(alias = "attemptToken")]
    #[validate(length(min = 1, max = 128, message = "attempt_token must be 1-128 characters"))]
    pub(crate) attempt_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FailedJobsQuery {
    pub(crate) limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) exam_id: String,
    pub(crate) state: SessionState,
    pub(crate) started_at: String,
    pub(crate) deadline: String,
    pub(crate) remaining_seconds: u64,
    pub(crate) answers: HashMap<String, String>,
    pub(crate) attempt_token: Option<String>,
    pub(crate) ended_at: Option<String>,
    pub(crate) graded_at: Option<String>,
}

impl SessionResponse {
    pub(crate) fn from_session(session: ExamSession, now: PrimitiveDateTime) -> Self {
        let remaining_seconds = if session.state == SessionState::Active {
            until(now, session.deadline).as_secs()
        } else {
            0
        };

        Self {
            remaining_seconds,
            started_at: format_primitive(session.started_at),
            deadline: format_primitive(session.deadline),
            ended_at: session.ended_at.map(format_primitive),
            graded_at: session.graded_at.map(format_primitive),
            id: session.id,
            user_id: session.user_id,
            exam_id: session.exam_id,
            state: session.state,
            answers: session.answers.0,
            attempt_token: session.attempt_token,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GradeResultResponse {
    pub(crate) session_id: String,
    pub(crate) score: f64,
    pub(crate) earned_points: f64,
    pub(crate) total_points: f64,
    pub(crate) passed: bool,
    pub(crate) time_taken_seconds: i64,
    pub(crate) graded_at: String,
    pub(crate) breakdown: Vec<QuestionOutcome>,
}

impl From<GradeResult> for GradeResultResponse {
    fn from(result: GradeResult) -> Self {
        Self {
            session_id: result.session_id,
            score: result.score,
            earned_points: result.earned_points,
            total_points: result.total_points,
            passed: result.passed,
            time_taken_seconds: result.time_taken_seconds,
            graded_at: format_primitive(result.graded_at),
            breakdown: result.per_question_breakdown.0,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingJobResponse {
    pub(crate) attempt_token: String,
    pub(crate) session_id: String,
    pub(crate) status: JobStatus,
    pub(crate) attempts: i32,
    pub(crate) enqueued_at: String,
    pub(crate) started_at: Option<String>,
    pub(crate) last_error: Option<String>,
    /// Set once the job has exhausted its attempts.
    pub(crate) failure: Option<String>,
    pub(crate) updated_at: String,
}

impl From<GradingJob> for GradingJobResponse {
    fn from(job: GradingJob) -> Self {
        let failure = ExamError::grading_failed(&job).map(|err| err.to_string());
        Self {
            attempt_token: job.attempt_token,
            session_id: job.session_id,
            status: job.status,
            attempts: job.attempts,
            enqueued_at: format_primitive(job.enqueued_at),
            started_at: job.started_at.map(format_primitive),
            last_error: job.last_error,
            failure,
            updated_at: format_primitive(job.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::types::Json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn start_request_rejects_empty_exam_id() {
        let request = StartSessionRequest { exam_id: String::new() };
        assert!(request.validate().is_err());
        let request: StartSessionRequest = serde_json::from_str(r#"{"examId":"e1"}"#).unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn remaining_seconds_only_for_active_sessions() {
        let mut session = ExamSession {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            exam_id: "e1".to_string(),
            started_at: datetime!(2025-03-01 10:00),
            deadline: datetime!(2025-03-01 10:30),
            state: SessionState::Active,
            answers: Json(HashMap::new()),
            attempt_token: None,
            ended_at: None,
            graded_at: None,
            created_at: datetime!(2025-03-01 10:00),
            updated_at: datetime!(2025-03-01 10:00),
        };
        let now = datetime!(2025-03-01 10:20);

        let response = SessionResponse::from_session(session.clone(), now);
        assert_eq!(response.remaining_seconds, 600);
        assert_eq!(response.deadline, "2025-03-01T10:30:00Z");

        session.state = SessionState::Submitted;
        assert_eq!(SessionResponse::from_session(session, now).remaining_seconds, 0);
    }

    #[test]
    fn failed_job_reports_permanent_failure() {
        let mut job = GradingJob {
            attempt_token: "t1".to_string(),
            session_id: "s1".to_string(),
            status: JobStatus::InProgress,
            attempts: 2,
            enqueued_at: datetime!(2025-03-01 10:30),
            started_at: Some(datetime!(2025-03-01 10:31)),
            last_error: Some("timeout".to_string()),
            updated_at: datetime!(2025-03-01 10:31),
        };
        assert_eq!(GradingJobResponse::from(job.clone()).failure, None);

        job.status = JobStatus::Failed;
        job.attempts = 3;
        let response = GradingJobResponse::from(job);
        assert_eq!(
            response.failure.as_deref(),
            Some("grading failed permanently for attempt t1 after 3 attempts")
        );
        assert_eq!(response.last_error.as_deref(), Some("timeout"));
    }
}
