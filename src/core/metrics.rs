use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("sessions_started_total", "Exam sessions opened");
    metrics::describe_counter!("sessions_submitted_total", "Sessions submitted by the user");
    metrics::describe_counter!("sessions_expired_total", "Sessions closed by their deadline");
    metrics::describe_counter!("deadlines_fired_total", "Deadline entries marked fired");
    metrics::describe_counter!(
        "deadline_expire_degraded_total",
        "Deadline expirations that failed and were rescheduled"
    );
    metrics::describe_counter!("grading_jobs_total", "Grading jobs by outcome");
    metrics::describe_histogram!("grading_duration_seconds", "Time spent grading one job");
    metrics::describe_counter!(
        "grading_jobs_failed_permanent_total",
        "Jobs that exhausted their attempts"
    );
    metrics::describe_counter!("grading_jobs_reaped_total", "Stale in-progress jobs requeued");
    metrics::describe_counter!("http_requests_total", "HTTP requests by method and status");
}
