use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Delivery, JobQueue, QueueError, QueueMessage};

#[derive(Default)]
struct State {
    ready: VecDeque<String>,
    in_flight: Vec<String>,
    published: Vec<QueueMessage>,
    publish_failures: u32,
}

/// Process-local queue with the same ready / in-flight split as the Redis one.
#[derive(Default)]
pub(crate) struct MemoryJobQueue {
    state: Mutex<State>,
}

impl MemoryJobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn fail_next_publishes(&self, times: u32) {
        self.lock().publish_failures = times;
    }

    /// Every message ever published, in order.
    pub(crate) fn published(&self) -> Vec<QueueMessage> {
        self.lock().published.clone()
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        let mut state = self.lock();
        if state.publish_failures > 0 {
            state.publish_failures -= 1;
            return Err(QueueError::Unavailable("injected publish failure".to_string()));
        }
        state.ready.push_back(payload);
        state.published.push(message.clone());
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock();
        let Some(raw) = state.ready.pop_front() else {
            return Ok(None);
        };
        let message = QueueMessage::decode(&raw)?;
        state.in_flight.push(raw.clone());
        Ok(Some(Delivery { message, raw }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock();
        if let Some(position) = state.in_flight.iter().position(|raw| *raw == delivery.raw) {
            state.in_flight.remove(position);
        }
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, QueueError> {
        let mut state = self.lock();
        let leftovers: Vec<String> = state.in_flight.drain(..).collect();
        let moved = leftovers.len();
        state.ready.extend(leftovers);
        Ok(moved)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(session: &str) -> QueueMessage {
        QueueMessage::Grade { session_id: session.to_string(), attempt_token: "t".to_string() }
    }

    #[tokio::test]
    async fn unacked_messages_are_recovered() {
        let queue = MemoryJobQueue::new();
        queue.publish(&grade("s1")).await.unwrap();
        queue.publish(&grade("s2")).await.unwrap();

        let first = queue.consume().await.unwrap().unwrap();
        assert_eq!(first.message, grade("s1"));
        let second = queue.consume().await.unwrap().unwrap();
        queue.ack(&second).await.unwrap();
        assert!(queue.consume().await.unwrap().is_none());

        assert_eq!(queue.recover_unacked().await.unwrap(), 1);
        let again = queue.consume().await.unwrap().unwrap();
        assert_eq!(again.message, grade("s1"));
    }
}
