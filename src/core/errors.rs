use thiserror::Error;

use crate::db::models::GradingJob;
use crate::db::types::{JobStatus, SessionState};
use crate::queue::QueueError;
use crate::repositories::StoreError;

#[derive(Debug, Error)]
pub(crate) enum ExamError {
    #[error("an active session already exists for user {user_id} on exam {exam_id}")]
    Conflict { user_id: String, exam_id: String },
    #[error("session {session_id}: {detail}")]
    InvalidState { session_id: String, detail: String },
    #[error("{0} was modified concurrently")]
    ConcurrentModification(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("exam {0} is not available")]
    ExamUnavailable(String),
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error("transient store error: {0}")]
    TransientStore(String),
    #[error("transient queue error: {0}")]
    TransientQueue(String),
    #[error("grading failed permanently for attempt {attempt_token} after {attempts} attempts")]
    GradingFailedPermanent { attempt_token: String, attempts: i32 },
}

impl ExamError {
    pub(crate) fn wrong_state(session_id: &str, state: SessionState, operation: &str) -> Self {
        Self::InvalidState {
            session_id: session_id.to_string(),
            detail: format!("cannot {operation} while {state}"),
        }
    }

    pub(crate) fn deadline_passed(session_id: &str, operation: &str) -> Self {
        Self::InvalidState {
            session_id: session_id.to_string(),
            detail: format!("cannot {operation} after the deadline"),
        }
    }

    /// The operator-facing error for a job that ran out of attempts.
    pub(crate) fn grading_failed(job: &GradingJob) -> Option<Self> {
        (job.status == JobStatus::Failed).then(|| Self::GradingFailedPermanent {
            attempt_token: job.attempt_token.clone(),
            attempts: job.attempts,
        })
    }

    /// Infrastructure faults that a caller may retry with backoff.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::TransientQueue(_))
    }
}

impl From<StoreError> for ExamError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::ConcurrentModification(what) => Self::ConcurrentModification(what),
            StoreError::ActiveSessionExists { user_id, exam_id } => {
                Self::Conflict { user_id, exam_id }
            }
            StoreError::Transient(message) => Self::TransientStore(message),
        }
    }
}

impl From<QueueError> for ExamError {
    fn from(err: QueueError) -> Self {
        Self::TransientQueue(err.to_string())
    }
}
