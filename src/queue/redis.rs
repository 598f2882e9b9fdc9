use async_trait::async_trait;
use redis::AsyncCommands;

use super::{Delivery, JobQueue, QueueError, QueueMessage};
use crate::core::redis::RedisHandle;

/// Reliable-queue pattern over two Redis lists: `LPUSH` onto `ready`,
/// `RPOPLPUSH` into `processing`, `LREM` from `processing` on ack.
#[derive(Clone)]
pub(crate) struct RedisJobQueue {
    redis: RedisHandle,
    ready_key: String,
    processing_key: String,
}

impl RedisJobQueue {
    pub(crate) fn new(redis: RedisHandle, queue_key: &str) -> Self {
        Self {
            redis,
            ready_key: queue_key.to_string(),
            processing_key: format!("{queue_key}:processing"),
        }
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, QueueError> {
        self.redis
            .connection()
            .await
            .ok_or_else(|| QueueError::Unavailable("redis is not connected".to_string()))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.ready_key, payload).await?;
        Ok(())
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.rpoplpush(&self.ready_key, &self.processing_key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match QueueMessage::decode(&raw) {
            Ok(message) => Ok(Some(Delivery { message, raw })),
            Err(err) => {
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &raw).await?;
                Err(err)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, &delivery.raw).await?;
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let mut moved = 0;
        loop {
            let raw: Option<String> =
                conn.rpoplpush(&self.processing_key, &self.ready_key).await?;
            if raw.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
