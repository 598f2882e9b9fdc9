//! Persistence boundary for sessions, deadlines, grading jobs and results.
//!
//! Every state change goes through a conditional write keyed by the current
//! `state`, `status` or `fired` flag, so concurrent callers resolve without
//! external locks. [`postgres::PgSessionStore`] is the production backend;
//! [`memory::MemorySessionStore`] backs unit tests.

pub(crate) mod deadlines;
pub(crate) mod grades;
pub(crate) mod grading_jobs;
pub(crate) mod health;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod postgres;
pub(crate) mod question_sets;
pub(crate) mod sessions;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{DeadlineEntry, ExamSession, GradeResult, GradingJob, QuestionSet};
use crate::db::types::{JobStatus, SessionState};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    ConcurrentModification(String),
    #[error("active session already exists for user {user_id} on exam {exam_id}")]
    ActiveSessionExists { user_id: String, exam_id: String },
    #[error("{0}")]
    Transient(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;

/// Jobs touched by one reaper pass.
#[derive(Debug, Default)]
pub(crate) struct ReapOutcome {
    pub(crate) requeued: Vec<GradingJob>,
    pub(crate) failed: Vec<GradingJob>,
}

#[async_trait]
pub(crate) trait SessionStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    /// Inserts an Active session together with its deadline entry.
    ///
    /// Fails with [`StoreError::ActiveSessionExists`] when the user already has an
    /// Active session for the exam.
    async fn create_session(&self, session: &ExamSession) -> StoreResult<DeadlineEntry>;

    async fn load_session(&self, session_id: &str) -> StoreResult<Option<ExamSession>>;

    /// Writes the lifecycle columns of `session` only if the stored state still
    /// equals `expected`. Answers are left as stored.
    async fn save_session(&self, session: &ExamSession, expected: SessionState)
        -> StoreResult<()>;

    /// Upserts one answer if the session is Active and `now` is before its deadline.
    /// Returns `false` when the condition does not hold.
    async fn record_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool>;

    /// Submitted or Expired sessions that carry a token but have no grading job.
    async fn list_sessions_without_job(&self, limit: i64) -> StoreResult<Vec<ExamSession>>;

    /// Moves Submitted/Expired sessions that already have a result to Graded.
    async fn finalize_graded_sessions(&self, now: PrimitiveDateTime) -> StoreResult<u64>;

    async fn list_unfired_deadlines(&self) -> StoreResult<Vec<DeadlineEntry>>;

    /// Flips `fired` from false to true. Returns `false` if it was already fired.
    async fn mark_deadline_fired(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool>;

    /// Inserts a Pending job. Returns `false` if the token (or session) already has one.
    async fn create_job(&self, job: &GradingJob) -> StoreResult<bool>;

    async fn load_job(&self, attempt_token: &str) -> StoreResult<Option<GradingJob>>;

    /// Compare-and-set on job status. Entering InProgress stamps `started_at`.
    async fn transition_job(
        &self,
        attempt_token: &str,
        from: JobStatus,
        to: JobStatus,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool>;

    async fn record_job_error(
        &self,
        attempt_token: &str,
        error: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<()>;

    /// InProgress jobs started before `stale_before` go back to Pending with
    /// `attempts + 1`, or to Failed once `attempts + 1 >= max_attempts`.
    async fn reap_stale_jobs(
        &self,
        stale_before: PrimitiveDateTime,
        max_attempts: i32,
        now: PrimitiveDateTime,
    ) -> StoreResult<ReapOutcome>;

    /// Pending jobs untouched since `stale_before`; their `updated_at` is bumped to `now`.
    async fn claim_undelivered_jobs(
        &self,
        stale_before: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> StoreResult<Vec<GradingJob>>;

    async fn list_failed_jobs(&self, limit: i64) -> StoreResult<Vec<GradingJob>>;

    /// Failed → Pending with attempts reset. Returns `false` if the job is not Failed.
    async fn reset_failed_job(
        &self,
        attempt_token: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool>;

    async fn load_question_set(&self, exam_id: &str) -> StoreResult<Option<QuestionSet>>;

    /// Inserts the result. Returns `false` when the session already has one.
    async fn save_grade_result(&self, result: &GradeResult) -> StoreResult<bool>;

    async fn load_grade_result(&self, session_id: &str) -> StoreResult<Option<GradeResult>>;
}
