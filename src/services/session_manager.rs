use std::collections::HashMap;
use std::sync::Arc;

use sqlx::types::Json;
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::errors::ExamError;
use crate::db::models::{ExamSession, GradeResult};
use crate::db::types::SessionState;
use crate::repositories::{SessionStore, StoreError};
use crate::services::dispatcher::GradingDispatcher;
use crate::services::exam_timing::{attempt_duration, compute_deadline};
use crate::tasks::deadlines::DeadlineHandle;

/// Lost compare-and-set rounds tolerated before giving up with `ConcurrentModification`.
const MAX_TRANSITION_ROUNDS: usize = 3;

/// Owns every session transition up to Submitted / Expired.
#[derive(Clone)]
pub(crate) struct ExamSessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    dispatcher: GradingDispatcher,
    deadlines: DeadlineHandle,
    default_duration_minutes: u64,
}

impl ExamSessionManager {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        dispatcher: GradingDispatcher,
        deadlines: DeadlineHandle,
        default_duration_minutes: u64,
    ) -> Self {
        Self { store, clock, dispatcher, deadlines, default_duration_minutes }
    }

    pub(crate) async fn start_session(
        &self,
        user_id: &str,
        exam_id: &str,
    ) -> Result<ExamSession, ExamError> {
        let Some(set) = self.store.load_question_set(exam_id).await? else {
            return Err(ExamError::NotFound(format!("exam {exam_id}")));
        };

        let now = self.clock.now();
        if !set.is_available_at(now) {
            return Err(ExamError::ExamUnavailable(exam_id.to_string()));
        }

        let duration = attempt_duration(&set, self.default_duration_minutes);
        let session = ExamSession {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            exam_id: exam_id.to_string(),
            started_at: now,
            deadline: compute_deadline(now, duration, set.available_until),
            state: SessionState::Active,
            answers: Json(HashMap::new()),
            attempt_token: None,
            ended_at: None,
            graded_at: None,
            created_at: now,
            updated_at: now,
        };

        let entry = self.store.create_session(&session).await?;
        self.deadlines.register(entry);

        metrics::counter!("sessions_started_total").increment(1);
        tracing::info!(
            session_id = %session.id,
            user_id,
            exam_id,
            deadline = %session.deadline,
            "Exam session started"
        );

        Ok(session)
    }

    pub(crate) async fn get_session(&self, session_id: &str) -> Result<ExamSession, ExamError> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or_else(|| ExamError::NotFound(format!("session {session_id}")))
    }

    pub(crate) async fn get_result(&self, session_id: &str) -> Result<GradeResult, ExamError> {
        self.store
            .load_grade_result(session_id)
            .await?
            .ok_or_else(|| ExamError::NotFound(format!("result for session {session_id}")))
    }

    /// Upserts one answer. Only an Active session before its deadline accepts answers.
    pub(crate) async fn record_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<(), ExamError> {
        let now = self.clock.now();
        if self.store.record_answer(session_id, question_id, answer, now).await? {
            tracing::debug!(session_id, question_id, "Answer recorded");
            return Ok(());
        }

        let session = self.get_session(session_id).await?;
        if session.state != SessionState::Active {
            return Err(ExamError::wrong_state(session_id, session.state, "record an answer"));
        }
        Err(ExamError::deadline_passed(session_id, "record an answer"))
    }

    /// Active → Submitted under the caller's token, then hands the session to grading.
    ///
    /// Repeating the call with the same token returns the submitted session unchanged.
    pub(crate) async fn submit_session(
        &self,
        session_id: &str,
        attempt_token: &str,
    ) -> Result<ExamSession, ExamError> {
        if attempt_token.trim().is_empty() {
            return Err(ExamError::InvalidInput("attempt_token must not be empty".to_string()));
        }

        for _ in 0..MAX_TRANSITION_ROUNDS {
            let session = self.get_session(session_id).await?;

            match session.state {
                SessionState::Active => {}
                SessionState::Submitted
                    if session.attempt_token.as_deref() == Some(attempt_token) =>
                {
                    self.ensure_grading(&session, attempt_token).await;
                    return Ok(session);
                }
                state => return Err(ExamError::wrong_state(session_id, state, "submit")),
            }

            let now = self.clock.now();
            let mut submitted = session;
            submitted.state = SessionState::Submitted;
            submitted.attempt_token = Some(attempt_token.to_string());
            submitted.ended_at = Some(now);
            submitted.updated_at = now;

            match self.store.save_session(&submitted, SessionState::Active).await {
                Ok(()) => {}
                Err(StoreError::ConcurrentModification(_)) => continue,
                Err(err) => return Err(err.into()),
            }

            self.cancel_deadline(session_id).await;
            metrics::counter!("sessions_submitted_total").increment(1);
            tracing::info!(session_id, attempt_token, "Exam session submitted");

            self.ensure_grading(&submitted, attempt_token).await;
            return Ok(submitted);
        }

        Err(ExamError::ConcurrentModification(format!("session {session_id}")))
    }

    /// Deadline path: Active → Expired with a generated token. A session that is
    /// already terminal keeps its state; an ungraded one has its job re-ensured.
    pub(crate) async fn expire_session(&self, session_id: &str) -> Result<ExamSession, ExamError> {
        for _ in 0..MAX_TRANSITION_ROUNDS {
            let session = self.get_session(session_id).await?;

            match session.state {
                SessionState::Active => {}
                SessionState::Submitted | SessionState::Expired => {
                    match session.attempt_token.as_deref() {
                        Some(token) => self.dispatcher.enqueue(session_id, token).await?,
                        None => tracing::warn!(
                            session_id,
                            state = %session.state,
                            "Terminal session has no attempt token"
                        ),
                    }
                    return Ok(session);
                }
                SessionState::Graded => return Ok(session),
            }

            let now = self.clock.now();
            let token = Uuid::new_v4().to_string();
            let mut expired = session;
            expired.state = SessionState::Expired;
            expired.attempt_token = Some(token.clone());
            expired.ended_at = Some(now);
            expired.updated_at = now;

            match self.store.save_session(&expired, SessionState::Active).await {
                Ok(()) => {}
                Err(StoreError::ConcurrentModification(_)) => continue,
                Err(err) => return Err(err.into()),
            }

            metrics::counter!("sessions_expired_total").increment(1);
            tracing::info!(
                session_id,
                attempt_token = %token,
                answers = expired.answers().len(),
                "Exam session expired at deadline"
            );

            self.dispatcher.enqueue(session_id, &token).await?;
            return Ok(expired);
        }

        Err(ExamError::ConcurrentModification(format!("session {session_id}")))
    }

    async fn cancel_deadline(&self, session_id: &str) {
        self.deadlines.cancel(session_id);
        if let Err(err) = self.store.mark_deadline_fired(session_id, self.clock.now()).await {
            // the scheduler still fires it later; expiring a submitted session is a no-op
            tracing::warn!(session_id, error = %err, "Failed to cancel deadline entry");
        }
    }

    /// Enqueue failures after the transition are repaired by maintenance.
    async fn ensure_grading(&self, session: &ExamSession, attempt_token: &str) {
        if let Err(err) = self.dispatcher.enqueue(&session.id, attempt_token).await {
            tracing::warn!(
                session_id = %session.id,
                attempt_token,
                error = %err,
                "Grading dispatch deferred to maintenance"
            );
        }
    }
}
