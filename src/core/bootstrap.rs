use std::sync::Arc;

use anyhow::Context;

use crate::core::clock::SystemClock;
use crate::core::config::Settings;
use crate::core::redis::RedisHandle;
use crate::core::state::{AppState, StateParts};
use crate::db;
use crate::queue::redis::RedisJobQueue;
use crate::repositories::postgres::PgSessionStore;
use crate::services::notifier;
use crate::tasks::deadlines::{deadline_channel, DeadlineHandle, DeadlineReceiver};

/// Wires Postgres, Redis and the notifier into an [`AppState`].
///
/// With `with_scheduler` the returned receiver feeds an in-process deadline
/// scheduler; otherwise registrations are only picked up by resync.
pub(crate) async fn build_state(
    settings: Settings,
    with_scheduler: bool,
) -> anyhow::Result<(AppState, Option<DeadlineReceiver>)> {
    let db_pool = db::init_pool(&settings).await.context("Failed to connect to Postgres")?;
    db::run_migrations(&db_pool).await.context("Failed to run migrations")?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    redis.connect().await.context("Failed to connect to Redis")?;
    tracing::info!("Redis connected successfully");

    let queue = RedisJobQueue::new(redis.clone(), &settings.redis().grading_queue_key);
    let notifier = notifier::from_settings(&settings)?;

    let (deadlines, receiver) = if with_scheduler {
        let (handle, receiver) = deadline_channel();
        (handle, Some(receiver))
    } else {
        (DeadlineHandle::detached(), None)
    };

    let state = AppState::new(
        settings,
        StateParts {
            store: Arc::new(PgSessionStore::new(db_pool)),
            queue: Arc::new(queue),
            clock: Arc::new(SystemClock),
            notifier,
            deadlines,
            redis: Some(redis),
        },
    );

    Ok((state, receiver))
}

pub(crate) async fn teardown(state: &AppState) {
    if let Some(redis) = state.redis() {
        redis.disconnect().await;
        tracing::info!("Redis disconnected");
    }
}
