//! Work queue between the dispatcher and the grading workers.
//!
//! Delivery is at-least-once: a consumed message stays in a processing list
//! until it is acked, and `recover_unacked` moves leftovers back to the ready
//! list when a worker process starts.

#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum QueueMessage {
    Grade { session_id: String, attempt_token: String },
    NotifyGraded { session_id: String, user_id: String, exam_id: String, score: f64 },
}

impl QueueMessage {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Grade { .. } => "grade",
            Self::NotifyGraded { .. } => "notify_graded",
        }
    }

    pub(crate) fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|err| QueueError::Malformed(err.to_string()))
    }

    pub(crate) fn decode(raw: &str) -> Result<Self, QueueError> {
        serde_json::from_str(raw).map_err(|err| QueueError::Malformed(err.to_string()))
    }
}

/// A consumed message. `raw` is the exact payload so that ack removes this copy.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub(crate) message: QueueMessage,
    pub(crate) raw: String,
}

#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("malformed queue message: {0}")]
    Malformed(String),
}

impl From<::redis::RedisError> for QueueError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[async_trait]
pub(crate) trait JobQueue: Send + Sync {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Moves the oldest ready message to the processing list. Never blocks.
    async fn consume(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Returns unacked messages to the ready list. Returns how many moved.
    async fn recover_unacked(&self) -> Result<usize, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}
