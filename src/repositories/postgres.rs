use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use super::sessions::CreateOutcome;
use super::{
    deadlines, grades, grading_jobs, health, question_sets, sessions, ReapOutcome, SessionStore,
    StoreError, StoreResult,
};
use crate::db::models::{DeadlineEntry, ExamSession, GradeResult, GradingJob, QuestionSet};
use crate::db::types::{JobStatus, SessionState};

#[derive(Clone)]
pub(crate) struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn ping(&self) -> StoreResult<()> {
        health::ping(&self.pool).await?;
        Ok(())
    }

    async fn create_session(&self, session: &ExamSession) -> StoreResult<DeadlineEntry> {
        match sessions::create_with_deadline(&self.pool, session).await? {
            CreateOutcome::Created(entry) => Ok(entry),
            CreateOutcome::ActiveExists => Err(StoreError::ActiveSessionExists {
                user_id: session.user_id.clone(),
                exam_id: session.exam_id.clone(),
            }),
        }
    }

    async fn load_session(&self, session_id: &str) -> StoreResult<Option<ExamSession>> {
        Ok(sessions::find_by_id(&self.pool, session_id).await?)
    }

    async fn save_session(
        &self,
        session: &ExamSession,
        expected: SessionState,
    ) -> StoreResult<()> {
        if sessions::update_if_state(&self.pool, session, expected).await? {
            return Ok(());
        }
        if sessions::exists(&self.pool, &session.id).await? {
            Err(StoreError::ConcurrentModification(format!("session {}", session.id)))
        } else {
            Err(StoreError::NotFound(format!("session {}", session.id)))
        }
    }

    async fn record_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        Ok(sessions::upsert_answer(&self.pool, session_id, question_id, answer, now).await?)
    }

    async fn list_sessions_without_job(&self, limit: i64) -> StoreResult<Vec<ExamSession>> {
        Ok(sessions::list_terminal_without_job(&self.pool, limit).await?)
    }

    async fn finalize_graded_sessions(&self, now: PrimitiveDateTime) -> StoreResult<u64> {
        Ok(sessions::mark_graded_where_result_exists(&self.pool, now).await?)
    }

    async fn list_unfired_deadlines(&self) -> StoreResult<Vec<DeadlineEntry>> {
        Ok(deadlines::list_unfired(&self.pool).await?)
    }

    async fn mark_deadline_fired(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        Ok(deadlines::mark_fired(&self.pool, session_id, now).await?)
    }

    async fn create_job(&self, job: &GradingJob) -> StoreResult<bool> {
        Ok(grading_jobs::create(&self.pool, job).await?)
    }

    async fn load_job(&self, attempt_token: &str) -> StoreResult<Option<GradingJob>> {
        Ok(grading_jobs::find(&self.pool, attempt_token).await?)
    }

    async fn transition_job(
        &self,
        attempt_token: &str,
        from: JobStatus,
        to: JobStatus,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        Ok(grading_jobs::transition(&self.pool, attempt_token, from, to, now).await?)
    }

    async fn record_job_error(
        &self,
        attempt_token: &str,
        error: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<()> {
        Ok(grading_jobs::record_error(&self.pool, attempt_token, error, now).await?)
    }

    async fn reap_stale_jobs(
        &self,
        stale_before: PrimitiveDateTime,
        max_attempts: i32,
        now: PrimitiveDateTime,
    ) -> StoreResult<ReapOutcome> {
        let reaped = grading_jobs::reap_stale(&self.pool, stale_before, max_attempts, now).await?;
        let (failed, requeued) =
            reaped.into_iter().partition(|job| job.status == JobStatus::Failed);
        Ok(ReapOutcome { requeued, failed })
    }

    async fn claim_undelivered_jobs(
        &self,
        stale_before: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> StoreResult<Vec<GradingJob>> {
        Ok(grading_jobs::claim_undelivered(&self.pool, stale_before, now).await?)
    }

    async fn list_failed_jobs(&self, limit: i64) -> StoreResult<Vec<GradingJob>> {
        Ok(grading_jobs::list_failed(&self.pool, limit).await?)
    }

    async fn reset_failed_job(
        &self,
        attempt_token: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        Ok(grading_jobs::reset_failed(&self.pool, attempt_token, now).await?)
    }

    async fn load_question_set(&self, exam_id: &str) -> StoreResult<Option<QuestionSet>> {
        Ok(question_sets::find(&self.pool, exam_id).await?)
    }

    async fn save_grade_result(&self, result: &GradeResult) -> StoreResult<bool> {
        Ok(grades::insert(&self.pool, result).await?)
    }

    async fn load_grade_result(&self, session_id: &str) -> StoreResult<Option<GradeResult>> {
        Ok(grades::find(&self.pool, session_id).await?)
    }
}
