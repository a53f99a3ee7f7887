use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub portal_base_url: String,
    /// Concurrent interactive harvests admitted before queueing.
    pub admission_limit: usize,
    /// How often the worker polls for a pending job.
    pub worker_poll_interval: Duration,
    /// How often a running job re-reads its own status for external cancellation.
    pub status_poll_interval: Duration,
    /// Cron schedule (seconds-resolution, 6 fields) for the stuck-job sweep.
    pub sweep_schedule: String,
    /// Processing jobs untouched longer than this are returned to pending.
    pub stuck_after: Duration,
    /// Base delay between whole-run retry attempts.
    pub retry_base_delay: Duration,
    /// Exam label substrings to harvest exclusively (empty = all).
    pub exam_allow: Vec<String>,
    /// Exam label substrings to never harvest.
    pub exam_deny: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            portal_base_url: env::var("PORTAL_BASE_URL")
                .unwrap_or_else(|_| "https://portal.example.edu".to_string()),
            admission_limit: parse_var("MAX_CONCURRENT_HARVESTS", 3)?,
            worker_poll_interval: Duration::from_secs(parse_var("WORKER_POLL_SECONDS", 20)?),
            status_poll_interval: Duration::from_secs(parse_var("STATUS_POLL_SECONDS", 10)?),
            sweep_schedule: env::var("SWEEP_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
            stuck_after: Duration::from_secs(60 * parse_var("STUCK_JOB_MINUTES", 30)?),
            retry_base_delay: Duration::from_secs(parse_var("RETRY_BASE_SECONDS", 5)?),
            exam_allow: list_var("EXAM_LABEL_ALLOW"),
            exam_deny: list_var("EXAM_LABEL_DENY"),
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

/// Comma-separated list variable; missing or empty means an empty list.
fn list_var(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
