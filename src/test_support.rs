use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::api;
use crate::core::clock::{Clock, TokioClock};
use crate::core::config::Settings;
use crate::core::state::{AppState, StateParts};
use crate::db::models::{Question, QuestionSet};
use crate::queue::memory::MemoryJobQueue;
use crate::repositories::memory::MemorySessionStore;
use crate::services::notifier::GradeNotifier;
use crate::tasks::deadlines::{deadline_channel, DeadlineReceiver};
use crate::tasks::scheduler;

pub(crate) const EXAM_ID: &str = "capitals";
pub(crate) const USER_ID: &str = "student-1";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("QUIZMASTER_ENV", "test");
    std::env::set_var("QUIZMASTER_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for var in [
        "DATABASE_URL",
        "ENVIRONMENT",
        "API_V1_STR",
        "QUIZMASTER_HOST",
        "QUIZMASTER_PORT",
        "POSTGRES_PASSWORD",
        "GRADING_QUEUE_KEY",
        "GRADING_WORKERS",
        "GRADING_MAX_ATTEMPTS",
        "GRADING_IN_PROGRESS_TIMEOUT_SECONDS",
        "GRADING_POLL_INTERVAL_MS",
        "GRADING_REAPER_INTERVAL_SECONDS",
        "GRADING_PENDING_REPUBLISH_SECONDS",
        "EXAM_DEFAULT_DURATION_MINUTES",
        "SCHEDULER_RESYNC_INTERVAL_SECONDS",
        "SCHEDULER_RETRY_BASE_MS",
        "SCHEDULER_RETRY_CAP_SECONDS",
        "NOTIFY_WEBHOOK_URL",
        "GCHAT_WEBHOOK_URL",
    ] {
        std::env::remove_var(var);
    }
}

pub(crate) async fn test_settings() -> Settings {
    let _guard = env_lock().await;
    set_test_env();
    Settings::load().expect("settings")
}

/// Two questions worth 1 point each, 30 minutes, always available.
pub(crate) fn capitals_exam() -> QuestionSet {
    QuestionSet {
        exam_id: EXAM_ID.to_string(),
        title: "European capitals".to_string(),
        duration_seconds: Some(1800),
        passing_score: 50.0,
        available_from: None,
        available_until: None,
        questions: vec![
            Question { id: "q1".to_string(), answer_key: "Paris".to_string(), points: 1.0 },
            Question { id: "q2".to_string(), answer_key: "Madrid".to_string(), points: 1.0 },
        ],
    }
}

/// Records every graded notification it receives.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    calls: StdMutex<Vec<(String, String, f64)>>,
}

impl RecordingNotifier {
    pub(crate) fn calls(&self) -> Vec<(String, String, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GradeNotifier for RecordingNotifier {
    async fn notify_graded(&self, user_id: &str, exam_id: &str, score: f64) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((user_id.to_string(), exam_id.to_string(), score));
        Ok(())
    }
}

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: Arc<MemorySessionStore>,
    pub(crate) queue: Arc<MemoryJobQueue>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    deadlines: Option<DeadlineReceiver>,
}

/// In-memory store and queue, a clock that follows tokio time, and the capitals exam.
pub(crate) async fn setup_test_context() -> TestContext {
    setup_with_clock(Arc::new(TokioClock::new(datetime!(2025-03-01 10:00)))).await
}

pub(crate) async fn setup_with_clock(clock: Arc<dyn Clock>) -> TestContext {
    let settings = test_settings().await;
    let store = Arc::new(MemorySessionStore::new());
    store.insert_question_set(capitals_exam());
    let queue = Arc::new(MemoryJobQueue::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let (handle, receiver) = deadline_channel();

    let state = AppState::new(
        settings,
        StateParts {
            store: store.clone(),
            queue: queue.clone(),
            clock,
            notifier: notifier.clone(),
            deadlines: handle,
            redis: None,
        },
    );
    let app = api::router::router(state.clone());

    TestContext { state, app, store, queue, notifier, deadlines: Some(receiver) }
}

pub(crate) struct RunningTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningTask {
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(true);
        self.handle.await.expect("join").expect("task result");
    }
}

impl TestContext {
    /// Starts the deadline loop wired to this context's manager.
    /// The first call receives in-process registrations; later calls rely on resync.
    pub(crate) fn spawn_scheduler(&mut self) -> RunningTask {
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(scheduler::run_deadlines(
            self.state.clone(),
            self.deadlines.take(),
            shutdown,
        ));
        RunningTask { stop, handle }
    }

    /// Drains the queue through the worker code path until it is empty.
    pub(crate) async fn drain_queue(&self) {
        while let Some(delivery) = crate::queue::JobQueue::consume(&*self.queue).await.expect("consume") {
            crate::tasks::grading::handle_delivery(&self.state, delivery).await;
        }
    }
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    user_id: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id);
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
