use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::core::config::Settings;

/// Hook invoked once a session has been graded.
#[async_trait]
pub(crate) trait GradeNotifier: Send + Sync {
    async fn notify_graded(&self, user_id: &str, exam_id: &str, score: f64) -> Result<()>;
}

pub(crate) fn from_settings(settings: &Settings) -> Result<Arc<dyn GradeNotifier>> {
    match settings.notify().webhook_url.as_deref() {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url,
            Duration::from_secs(settings.notify().timeout_seconds.max(1)),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LogNotifier;

#[async_trait]
impl GradeNotifier for LogNotifier {
    async fn notify_graded(&self, user_id: &str, exam_id: &str, score: f64) -> Result<()> {
        tracing::info!(user_id, exam_id, score, "Exam graded");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage {
    text: String,
}

/// Posts `{"text": ...}` to a chat-style incoming webhook.
#[derive(Debug, Clone)]
pub(crate) struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub(crate) fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;

        Ok(Self { client, url: url.to_string() })
    }
}

#[async_trait]
impl GradeNotifier for WebhookNotifier {
    async fn notify_graded(&self, user_id: &str, exam_id: &str, score: f64) -> Result<()> {
        let message = WebhookMessage { text: graded_message(user_id, exam_id, score) };

        self.client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .context("Failed to call notification webhook")?
            .error_for_status()
            .context("Notification webhook rejected the message")?;

        Ok(())
    }
}

fn graded_message(user_id: &str, exam_id: &str, score: f64) -> String {
    format!("User {user_id} completed exam {exam_id} with score {score:.1}%")
}
