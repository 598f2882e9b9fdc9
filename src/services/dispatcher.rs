use std::sync::Arc;

use crate::core::backoff::{retry, Backoff};
use crate::core::clock::Clock;
use crate::core::errors::ExamError;
use crate::db::models::GradingJob;
use crate::db::types::JobStatus;
use crate::queue::{JobQueue, QueueMessage};
use crate::repositories::SessionStore;

const DISPATCH_ATTEMPTS: u32 = 4;

/// Persists grading jobs and hands them to the queue.
#[derive(Clone)]
pub(crate) struct GradingDispatcher {
    store: Arc<dyn SessionStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl GradingDispatcher {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        backoff: Backoff,
    ) -> Self {
        Self { store, queue, clock, backoff }
    }

    /// Creates a Pending job for `attempt_token` unless it exists, then publishes it.
    ///
    /// Safe to repeat: a job that is already running or finished is not republished,
    /// and a Pending one is published again (workers drop duplicates).
    pub(crate) async fn enqueue(&self, session_id: &str, attempt_token: &str) -> Result<(), ExamError> {
        let now = self.clock.now();
        let job = GradingJob {
            attempt_token: attempt_token.to_string(),
            session_id: session_id.to_string(),
            status: JobStatus::Pending,
            attempts: 0,
            enqueued_at: now,
            started_at: None,
            last_error: None,
            updated_at: now,
        };

        let job = &job;
        let created = retry(self.backoff, DISPATCH_ATTEMPTS, ExamError::is_transient, || async move {
            Ok::<_, ExamError>(self.store.create_job(job).await?)
        })
        .await?;

        if !created {
            let existing = retry(self.backoff, DISPATCH_ATTEMPTS, ExamError::is_transient, || async move {
                Ok::<_, ExamError>(self.store.load_job(attempt_token).await?)
            })
            .await?;

            match existing {
                Some(existing) if existing.status == JobStatus::Pending => {}
                Some(existing) => {
                    tracing::debug!(
                        session_id,
                        attempt_token,
                        status = %existing.status,
                        "Grading job already dispatched"
                    );
                    return Ok(());
                }
                None => {
                    tracing::warn!(
                        session_id,
                        attempt_token,
                        "Session already has a grading job under another token"
                    );
                    return Ok(());
                }
            }
        }

        self.publish_grade(session_id, attempt_token).await?;
        tracing::info!(session_id, attempt_token, created, "Grading job enqueued");
        Ok(())
    }

    pub(crate) async fn publish_grade(
        &self,
        session_id: &str,
        attempt_token: &str,
    ) -> Result<(), ExamError> {
        let message = QueueMessage::Grade {
            session_id: session_id.to_string(),
            attempt_token: attempt_token.to_string(),
        };
        let message = &message;
        retry(self.backoff, DISPATCH_ATTEMPTS, ExamError::is_transient, || async move {
            Ok::<_, ExamError>(self.queue.publish(message).await?)
        })
        .await
    }

    pub(crate) async fn list_failed(&self, limit: i64) -> Result<Vec<GradingJob>, ExamError> {
        Ok(self.store.list_failed_jobs(limit).await?)
    }

    /// Operator action: Failed → Pending with a fresh attempt budget, then republish.
    pub(crate) async fn retry_failed(&self, attempt_token: &str) -> Result<GradingJob, ExamError> {
        let Some(job) = self.store.load_job(attempt_token).await? else {
            return Err(ExamError::NotFound(format!("grading job {attempt_token}")));
        };

        if !self.store.reset_failed_job(attempt_token, self.clock.now()).await? {
            return Err(ExamError::InvalidState {
                session_id: job.session_id,
                detail: format!("grading job {attempt_token} is not failed"),
            });
        }

        tracing::warn!(
            session_id = %job.session_id,
            attempt_token,
            previous_attempts = job.attempts,
            "Failed grading job reset by operator"
        );
        self.publish_grade(&job.session_id, attempt_token).await?;

        self.store
            .load_job(attempt_token)
            .await?
            .ok_or_else(|| ExamError::NotFound(format!("grading job {attempt_token}")))
    }
}
