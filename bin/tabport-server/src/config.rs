//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use tabport_core::{DetachPolicy, OrchestratorConfig, ReaperPolicy, RetentionPolicy};

/// Runtime configuration for tabport-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite database URL (default: `"sqlite://tabport.db"`). The file is
    /// created when missing; `sqlite::memory:` works for throwaway runs.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for daily rolling log files. Stdout only when unset.
    pub log_dir: Option<String>,

    /// Number of exports that may render concurrently.
    pub worker_capacity: usize,

    /// Deadline used when neither the request nor the job kind sets one.
    pub default_deadline_ms: u64,

    pub detach_policy: DetachPolicy,

    /// Root directory of the filesystem artifact sink.
    pub artifact_dir: String,

    /// Base URL that presigned artifact links point at.
    pub public_url: String,

    /// Signing secret for presigned URLs. Random per process when unset,
    /// which invalidates outstanding links on restart.
    pub url_secret: String,

    pub url_ttl_secs: u64,

    /// Where bundled spreadsheet templates live.
    pub template_dir: String,

    pub retention_days: u64,
    pub retention_interval_secs: u64,
    pub stuck_after_secs: u64,
    pub reaper_interval_secs: u64,

    /// Comma-separated CORS allow-list; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: `true`).
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("TABPORT_BIND", "0.0.0.0:3000"),
            database_url: env_or("TABPORT_DATABASE_URL", "sqlite://tabport.db"),
            log_level: env_or("TABPORT_LOG", "info"),
            log_json: parse_bool("TABPORT_LOG_JSON", false),
            log_dir: std::env::var("TABPORT_LOG_DIR").ok().filter(|v| !v.trim().is_empty()),
            worker_capacity: parse_env("TABPORT_WORKER_CAPACITY", 4),
            default_deadline_ms: parse_env("TABPORT_DEFAULT_DEADLINE_MS", 1000),
            detach_policy: parse_env("TABPORT_DETACH_POLICY", DetachPolicy::default()),
            artifact_dir: env_or("TABPORT_ARTIFACT_DIR", "./artifacts"),
            public_url: env_or("TABPORT_PUBLIC_URL", "http://localhost:3000"),
            url_secret: std::env::var("TABPORT_URL_SECRET")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(random_secret),
            url_ttl_secs: parse_env("TABPORT_URL_TTL_SECS", 7 * 24 * 60 * 60),
            template_dir: env_or("TABPORT_TEMPLATE_DIR", "./templates"),
            retention_days: parse_env("TABPORT_RETENTION_DAYS", 7),
            retention_interval_secs: parse_env("TABPORT_RETENTION_INTERVAL_SECS", 60 * 60),
            stuck_after_secs: parse_env("TABPORT_STUCK_AFTER_SECS", 2 * 60 * 60),
            reaper_interval_secs: parse_env("TABPORT_REAPER_INTERVAL_SECS", 30 * 60),
            cors_allowed_origins: std::env::var("TABPORT_CORS_ORIGINS").ok(),
            enable_swagger: parse_bool("TABPORT_ENABLE_SWAGGER", true),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_capacity: self.worker_capacity,
            default_deadline: Duration::from_millis(self.default_deadline_ms),
            detach_policy: self.detach_policy,
            url_ttl: Duration::from_secs(self.url_ttl_secs),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            interval: Duration::from_secs(self.retention_interval_secs.max(1)),
            retention: Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60)),
        }
    }

    pub fn reaper_policy(&self) -> ReaperPolicy {
        ReaperPolicy {
            interval: Duration::from_secs(self.reaper_interval_secs.max(1)),
            stale_after: Duration::from_secs(self.stuck_after_secs),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| is_truthy(&v))
        .unwrap_or(default)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn random_secret() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}
