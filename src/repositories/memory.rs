use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::PrimitiveDateTime;

use super::{ReapOutcome, SessionStore, StoreError, StoreResult};
use crate::db::models::{DeadlineEntry, ExamSession, GradeResult, GradingJob, QuestionSet};
use crate::db::types::{JobStatus, SessionState};

#[derive(Default)]
struct State {
    sessions: HashMap<String, ExamSession>,
    deadlines: HashMap<String, DeadlineEntry>,
    jobs: HashMap<String, GradingJob>,
    results: HashMap<String, GradeResult>,
    question_sets: HashMap<String, QuestionSet>,
    next_seq: i64,
    faults: HashMap<&'static str, u32>,
}

impl State {
    fn take_fault(&mut self, operation: &'static str) -> StoreResult<()> {
        match self.faults.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Transient(format!("injected {operation} failure")))
            }
            _ => Ok(()),
        }
    }
}

/// Same conditional-write semantics as the Postgres store, held in a mutex.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    state: Mutex<State>,
}

impl MemorySessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn insert_question_set(&self, set: QuestionSet) {
        self.lock().question_sets.insert(set.exam_id.clone(), set);
    }

    /// Makes the next `times` calls of `operation` fail with a transient error.
    pub(crate) fn fail_next(&self, operation: &'static str, times: u32) {
        self.lock().faults.insert(operation, times);
    }

    pub(crate) fn deadline(&self, session_id: &str) -> Option<DeadlineEntry> {
        self.lock().deadlines.get(session_id).cloned()
    }

    pub(crate) fn jobs_for_session(&self, session_id: &str) -> Vec<GradingJob> {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.session_id == session_id)
            .cloned()
            .collect()
    }

}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().take_fault("ping")
    }

    async fn create_session(&self, session: &ExamSession) -> StoreResult<DeadlineEntry> {
        let mut state = self.lock();
        state.take_fault("create_session")?;
        let active_exists = state.sessions.values().any(|existing| {
            existing.user_id == session.user_id
                && existing.exam_id == session.exam_id
                && existing.state == SessionState::Active
        });
        if active_exists {
            return Err(StoreError::ActiveSessionExists {
                user_id: session.user_id.clone(),
                exam_id: session.exam_id.clone(),
            });
        }

        state.next_seq += 1;
        let entry = DeadlineEntry {
            session_id: session.id.clone(),
            fires_at: session.deadline,
            seq: state.next_seq,
            fired: false,
            fired_at: None,
        };
        state.sessions.insert(session.id.clone(), session.clone());
        state.deadlines.insert(session.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn load_session(&self, session_id: &str) -> StoreResult<Option<ExamSession>> {
        let mut state = self.lock();
        state.take_fault("load_session")?;
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn save_session(
        &self,
        session: &ExamSession,
        expected: SessionState,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.take_fault("save_session")?;
        let Some(stored) = state.sessions.get_mut(&session.id) else {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        };
        if stored.state != expected {
            return Err(StoreError::ConcurrentModification(format!("session {}", session.id)));
        }
        stored.state = session.state;
        stored.attempt_token = session.attempt_token.clone();
        stored.ended_at = session.ended_at;
        stored.graded_at = session.graded_at;
        stored.updated_at = session.updated_at;
        Ok(())
    }

    async fn record_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        state.take_fault("record_answer")?;
        match state.sessions.get_mut(session_id) {
            Some(session) if session.state == SessionState::Active && session.deadline > now => {
                session.answers.0.insert(question_id.to_string(), answer.to_string());
                session.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_sessions_without_job(&self, limit: i64) -> StoreResult<Vec<ExamSession>> {
        let mut state = self.lock();
        state.take_fault("list_sessions_without_job")?;
        let mut pending: Vec<ExamSession> = state
            .sessions
            .values()
            .filter(|session| session.state.awaits_grading() && session.attempt_token.is_some())
            .filter(|session| !state.jobs.values().any(|job| job.session_id == session.id))
            .cloned()
            .collect();
        pending.sort_by_key(|session| session.updated_at);
        pending.truncate(limit.clamp(1, 1000) as usize);
        Ok(pending)
    }

    async fn finalize_graded_sessions(&self, now: PrimitiveDateTime) -> StoreResult<u64> {
        let mut state = self.lock();
        state.take_fault("finalize_graded_sessions")?;
        let State { sessions, results, .. } = &mut *state;
        let mut finalized = 0;
        for session in sessions.values_mut() {
            if !session.state.awaits_grading() {
                continue;
            }
            if let Some(result) = results.get(&session.id) {
                session.state = SessionState::Graded;
                session.graded_at = Some(result.graded_at);
                session.updated_at = now;
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    async fn list_unfired_deadlines(&self) -> StoreResult<Vec<DeadlineEntry>> {
        let mut state = self.lock();
        state.take_fault("list_unfired_deadlines")?;
        let mut entries: Vec<DeadlineEntry> =
            state.deadlines.values().filter(|entry| !entry.fired).cloned().collect();
        entries.sort_by_key(|entry| (entry.fires_at, entry.seq));
        Ok(entries)
    }

    async fn mark_deadline_fired(
        &self,
        session_id: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        state.take_fault("mark_deadline_fired")?;
        match state.deadlines.get_mut(session_id) {
            Some(entry) if !entry.fired => {
                entry.fired = true;
                entry.fired_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_job(&self, job: &GradingJob) -> StoreResult<bool> {
        let mut state = self.lock();
        state.take_fault("create_job")?;
        let duplicate = state.jobs.contains_key(&job.attempt_token)
            || state.jobs.values().any(|existing| existing.session_id == job.session_id);
        if duplicate {
            return Ok(false);
        }
        state.jobs.insert(job.attempt_token.clone(), job.clone());
        Ok(true)
    }

    async fn load_job(&self, attempt_token: &str) -> StoreResult<Option<GradingJob>> {
        let mut state = self.lock();
        state.take_fault("load_job")?;
        Ok(state.jobs.get(attempt_token).cloned())
    }

    async fn transition_job(
        &self,
        attempt_token: &str,
        from: JobStatus,
        to: JobStatus,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        state.take_fault("transition_job")?;
        match state.jobs.get_mut(attempt_token) {
            Some(job) if job.status == from => {
                job.status = to;
                if to == JobStatus::InProgress {
                    job.started_at = Some(now);
                }
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_job_error(
        &self,
        attempt_token: &str,
        error: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        state.take_fault("record_job_error")?;
        if let Some(job) = state.jobs.get_mut(attempt_token) {
            job.last_error = Some(error.to_string());
            job.updated_at = now;
        }
        Ok(())
    }

    async fn reap_stale_jobs(
        &self,
        stale_before: PrimitiveDateTime,
        max_attempts: i32,
        now: PrimitiveDateTime,
    ) -> StoreResult<ReapOutcome> {
        let mut state = self.lock();
        state.take_fault("reap_stale_jobs")?;
        let mut outcome = ReapOutcome::default();
        for job in state.jobs.values_mut() {
            let stale = job.status == JobStatus::InProgress
                && job.started_at.is_some_and(|started| started < stale_before);
            if !stale {
                continue;
            }
            job.attempts += 1;
            job.started_at = None;
            job.updated_at = now;
            if job.last_error.is_none() {
                job.last_error = Some("in-progress timeout exceeded".to_string());
            }
            if job.attempts >= max_attempts {
                job.status = JobStatus::Failed;
                outcome.failed.push(job.clone());
            } else {
                job.status = JobStatus::Pending;
                outcome.requeued.push(job.clone());
            }
        }
        Ok(outcome)
    }

    async fn claim_undelivered_jobs(
        &self,
        stale_before: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> StoreResult<Vec<GradingJob>> {
        let mut state = self.lock();
        state.take_fault("claim_undelivered_jobs")?;
        let mut claimed = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Pending && job.updated_at < stale_before {
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn list_failed_jobs(&self, limit: i64) -> StoreResult<Vec<GradingJob>> {
        let mut state = self.lock();
        state.take_fault("list_failed_jobs")?;
        let mut failed: Vec<GradingJob> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed.truncate(limit.clamp(1, 1000) as usize);
        Ok(failed)
    }

    async fn reset_failed_job(
        &self,
        attempt_token: &str,
        now: PrimitiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock();
        state.take_fault("reset_failed_job")?;
        match state.jobs.get_mut(attempt_token) {
            Some(job) if job.status == JobStatus::Failed => {
                job.status = JobStatus::Pending;
                job.attempts = 0;
                job.started_at = None;
                job.last_error = None;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn load_question_set(&self, exam_id: &str) -> StoreResult<Option<QuestionSet>> {
        let mut state = self.lock();
        state.take_fault("load_question_set")?;
        Ok(state.question_sets.get(exam_id).cloned())
    }

    async fn save_grade_result(&self, result: &GradeResult) -> StoreResult<bool> {
        let mut state = self.lock();
        state.take_fault("save_grade_result")?;
        if state.results.contains_key(&result.session_id) {
            return Ok(false);
        }
        state.results.insert(result.session_id.clone(), result.clone());
        Ok(true)
    }

    async fn load_grade_result(&self, session_id: &str) -> StoreResult<Option<GradeResult>> {
        let mut state = self.lock();
        state.take_fault("load_grade_result")?;
        Ok(state.results.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use sqlx::types::Json;
    use time::macros::datetime;

    use super::*;

    fn session(id: &str, user: &str, exam: &str) -> ExamSession {
        let started = datetime!(2025-03-01 10:00);
        ExamSession {
            id: id.to_string(),
            user_id: user.to_string(),
            exam_id: exam.to_string(),
            started_at: started,
            deadline: datetime!(2025-03-01 10:30),
            state: SessionState::Active,
            answers: Json(HashMap::new()),
            attempt_token: None,
            ended_at: None,
            graded_at: None,
            created_at: started,
            updated_at: started,
        }
    }

    fn job(token: &str, session_id: &str) -> GradingJob {
        GradingJob {
            attempt_token: token.to_string(),
            session_id: session_id.to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            enqueued_at: datetime!(2025-03-01 10:30),
            started_at: None,
            last_error: None,
            updated_at: datetime!(2025-03-01 10:30),
        }
    }

    #[tokio::test]
    async fn second_active_session_for_same_exam_is_rejected() {
        let store = MemorySessionStore::new();
        store.create_session(&session("s1", "u1", "e1")).await.unwrap();

        let err = store.create_session(&session("s2", "u1", "e1")).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveSessionExists { .. }));

        store.create_session(&session("s3", "u1", "e2")).await.unwrap();
        store.create_session(&session("s4", "u2", "e1")).await.unwrap();
    }

    #[tokio::test]
    async fn deadline_seq_increases_with_each_session() {
        let store = MemorySessionStore::new();
        let first = store.create_session(&session("s1", "u1", "e1")).await.unwrap();
        let second = store.create_session(&session("s2", "u2", "e1")).await.unwrap();
        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn save_session_is_conditional_on_expected_state() {
        let store = MemorySessionStore::new();
        let mut s = session("s1", "u1", "e1");
        store.create_session(&s).await.unwrap();

        s.state = SessionState::Submitted;
        store.save_session(&s, SessionState::Active).await.unwrap();

        s.state = SessionState::Expired;
        let err = store.save_session(&s, SessionState::Active).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrentModification(_)));

        let missing = session("nope", "u1", "e1");
        let err = store.save_session(&missing, SessionState::Active).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn state_transition_keeps_answers_recorded_after_load() {
        let store = MemorySessionStore::new();
        store.create_session(&session("s1", "u1", "e1")).await.unwrap();

        let mut snapshot = store.load_session("s1").await.unwrap().unwrap();
        assert!(store.record_answer("s1", "q1", "Paris", datetime!(2025-03-01 10:10)).await.unwrap());

        snapshot.state = SessionState::Submitted;
        snapshot.attempt_token = Some("t1".to_string());
        store.save_session(&snapshot, SessionState::Active).await.unwrap();

        let stored = store.load_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Submitted);
        assert_eq!(stored.answers().get("q1").map(String::as_str), Some("Paris"));
    }

    #[tokio::test]
    async fn record_answer_respects_deadline_and_state() {
        let store = MemorySessionStore::new();
        store.create_session(&session("s1", "u1", "e1")).await.unwrap();

        assert!(store.record_answer("s1", "q1", "a", datetime!(2025-03-01 10:10)).await.unwrap());
        assert!(store.record_answer("s1", "q1", "b", datetime!(2025-03-01 10:11)).await.unwrap());
        assert!(!store.record_answer("s1", "q2", "c", datetime!(2025-03-01 10:30)).await.unwrap());

        let stored = store.load_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.answers().get("q1").map(String::as_str), Some("b"));
        assert!(!stored.answers().contains_key("q2"));
    }

    #[tokio::test]
    async fn mark_deadline_fired_only_once() {
        let store = MemorySessionStore::new();
        store.create_session(&session("s1", "u1", "e1")).await.unwrap();
        let now = datetime!(2025-03-01 10:30);

        assert!(store.mark_deadline_fired("s1", now).await.unwrap());
        assert!(!store.mark_deadline_fired("s1", now).await.unwrap());
        assert!(store.list_unfired_deadlines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_job_per_token_and_per_session() {
        let store = MemorySessionStore::new();
        assert!(store.create_job(&job("t1", "s1")).await.unwrap());
        assert!(!store.create_job(&job("t1", "s1")).await.unwrap());
        assert!(!store.create_job(&job("t2", "s1")).await.unwrap());
    }

    #[tokio::test]
    async fn reaper_requeues_then_fails() {
        let store = MemorySessionStore::new();
        store.create_job(&job("t1", "s1")).await.unwrap();
        let now = datetime!(2025-03-01 11:00);

        for attempt in 1..=3 {
            assert!(store
                .transition_job("t1", JobStatus::Pending, JobStatus::InProgress, now)
                .await
                .unwrap());
            let outcome =
                store.reap_stale_jobs(datetime!(2025-03-01 12:00), 3, now).await.unwrap();
            if attempt < 3 {
                assert_eq!(outcome.requeued.len(), 1);
                assert!(outcome.failed.is_empty());
            } else {
                assert!(outcome.requeued.is_empty());
                assert_eq!(outcome.failed[0].attempts, 3);
            }
        }

        let failed = store.list_failed_jobs(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(store.reset_failed_job("t1", now).await.unwrap());
        assert!(!store.reset_failed_job("t1", now).await.unwrap());
        assert_eq!(store.load_job("t1").await.unwrap().unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn injected_fault_is_consumed() {
        let store = MemorySessionStore::new();
        store.fail_next("ping", 1);
        assert!(matches!(store.ping().await, Err(StoreError::Transient(_))));
        store.ping().await.unwrap();
    }
}
