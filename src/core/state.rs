use std::sync::Arc;

use crate::core::backoff::Backoff;
use crate::core::clock::Clock;
use crate::core::{config::Settings, redis::RedisHandle};
use crate::queue::JobQueue;
use crate::repositories::SessionStore;
use crate::services::dispatcher::GradingDispatcher;
use crate::services::notifier::GradeNotifier;
use crate::services::session_manager::ExamSessionManager;
use crate::tasks::deadlines::DeadlineHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn SessionStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    dispatcher: GradingDispatcher,
    sessions: ExamSessionManager,
    notifier: Arc<dyn GradeNotifier>,
    redis: Option<RedisHandle>,
}

pub(crate) struct StateParts {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) notifier: Arc<dyn GradeNotifier>,
    pub(crate) deadlines: DeadlineHandle,
    pub(crate) redis: Option<RedisHandle>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, parts: StateParts) -> Self {
        let StateParts { store, queue, clock, notifier, deadlines, redis } = parts;
        let dispatcher = GradingDispatcher::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            retry_backoff(&settings),
        );
        let sessions = ExamSessionManager::new(
            store.clone(),
            clock.clone(),
            dispatcher.clone(),
            deadlines,
            settings.exam().default_duration_minutes,
        );

        Self {
            inner: Arc::new(InnerState {
                settings,
                store,
                queue,
                clock,
                dispatcher,
                sessions,
                notifier,
                redis,
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub(crate) fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.inner.queue
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn dispatcher(&self) -> &GradingDispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn sessions(&self) -> &ExamSessionManager {
        &self.inner.sessions
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn GradeNotifier> {
        &self.inner.notifier
    }

    pub(crate) fn redis(&self) -> Option<&RedisHandle> {
        self.inner.redis.as_ref()
    }

    pub(crate) fn backoff(&self) -> Backoff {
        retry_backoff(self.settings())
    }
}

fn retry_backoff(settings: &Settings) -> Backoff {
    Backoff::new(settings.scheduler().retry_base(), settings.scheduler().retry_cap())
}
