use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_environment, parse_positive_u64, parse_u16,
    parse_u32, parse_u64, parse_webhook_url,
};
use super::types::{
    ApiSettings, ConfigError, DatabaseSettings, ExamSettings, GradingSettings, NotifySettings,
    RedisSettings, RuntimeSettings, SchedulerSettings, ServerHost, ServerPort, ServerSettings,
    Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("QUIZMASTER_HOST", "0.0.0.0");
        let port = env_or_default("QUIZMASTER_PORT", "8000");

        let environment = parse_environment(
            env_optional("QUIZMASTER_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("QUIZMASTER_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Quiz Master API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "quizmaster");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "quizmaster_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections =
            parse_u32("DB_MAX_CONNECTIONS", env_or_default("DB_MAX_CONNECTIONS", "20"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");
        let grading_queue_key = env_or_default("GRADING_QUEUE_KEY", "quizmaster:grading");

        let default_duration_minutes = parse_positive_u64(
            "EXAM_DEFAULT_DURATION_MINUTES",
            env_or_default("EXAM_DEFAULT_DURATION_MINUTES", "30"),
        )?;

        let workers =
            parse_positive_u64("GRADING_WORKERS", env_or_default("GRADING_WORKERS", "3"))?;
        let max_attempts = parse_u32(
            "GRADING_MAX_ATTEMPTS",
            env_or_default("GRADING_MAX_ATTEMPTS", "3"),
        )?;
        let in_progress_timeout_seconds = parse_positive_u64(
            "GRADING_IN_PROGRESS_TIMEOUT_SECONDS",
            env_or_default("GRADING_IN_PROGRESS_TIMEOUT_SECONDS", "300"),
        )?;
        let poll_interval_ms = parse_positive_u64(
            "GRADING_POLL_INTERVAL_MS",
            env_or_default("GRADING_POLL_INTERVAL_MS", "2000"),
        )?;
        let reaper_interval_seconds = parse_positive_u64(
            "GRADING_REAPER_INTERVAL_SECONDS",
            env_or_default("GRADING_REAPER_INTERVAL_SECONDS", "60"),
        )?;
        let pending_republish_seconds = parse_positive_u64(
            "GRADING_PENDING_REPUBLISH_SECONDS",
            env_or_default("GRADING_PENDING_REPUBLISH_SECONDS", "120"),
        )?;

        let resync_interval_seconds = parse_positive_u64(
            "SCHEDULER_RESYNC_INTERVAL_SECONDS",
            env_or_default("SCHEDULER_RESYNC_INTERVAL_SECONDS", "30"),
        )?;
        let retry_base_ms = parse_positive_u64(
            "SCHEDULER_RETRY_BASE_MS",
            env_or_default("SCHEDULER_RETRY_BASE_MS", "500"),
        )?;
        let retry_cap_seconds = parse_positive_u64(
            "SCHEDULER_RETRY_CAP_SECONDS",
            env_or_default("SCHEDULER_RETRY_CAP_SECONDS", "60"),
        )?;

        let webhook_url = parse_webhook_url(
            env_optional("NOTIFY_WEBHOOK_URL").or_else(|| env_optional("GCHAT_WEBHOOK_URL")),
        )?;
        let notify_timeout_seconds =
            parse_u64("NOTIFY_TIMEOUT_SECONDS", env_or_default("NOTIFY_TIMEOUT_SECONDS", "10"))?;

        let log_level = env_or_default("QUIZMASTER_LOG_LEVEL", "info");
        let json = env_optional("QUIZMASTER_LOG_JSON")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let prometheus_enabled = env_optional("PROMETHEUS_ENABLED")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
                grading_queue_key,
            },
            exam: ExamSettings { default_duration_minutes },
            grading: GradingSettings {
                workers: workers.min(usize::MAX as u64) as usize,
                max_attempts,
                in_progress_timeout_seconds,
                poll_interval_ms,
                reaper_interval_seconds,
                pending_republish_seconds,
            },
            scheduler: SchedulerSettings {
                resync_interval_seconds,
                retry_base_ms,
                retry_cap_seconds,
            },
            notify: NotifySettings { webhook_url, timeout_seconds: notify_timeout_seconds },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn scheduler(&self) -> &SchedulerSettings {
        &self.scheduler
    }

    pub(crate) fn notify(&self) -> &NotifySettings {
        &self.notify
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grading.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_MAX_ATTEMPTS",
                value: String::from("0"),
            });
        }

        if self.scheduler.retry_base_ms > self.scheduler.retry_cap_seconds.saturating_mul(1000) {
            return Err(ConfigError::InvalidValue {
                field: "SCHEDULER_RETRY_BASE_MS",
                value: self.scheduler.retry_base_ms.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
