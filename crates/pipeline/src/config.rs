use std::time::Duration;

/// Pipeline configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Budget-consuming errors before a task is terminated (default: `3`).
    pub max_error_count: i64,
    /// Poll interval of the worker loops (default: `10` seconds).
    pub poll_interval: Duration,
    /// Base URL of the Nomad cluster (default: `http://localhost:4646`).
    pub nomad_url: String,
    /// How far back the evaluator scans for candidates (default: `30` days).
    pub scan_window_days: i32,
    /// A job with no status change for longer than
    /// `max(lost_job_min, lost_job_duration_multiplier * routine duration)`
    /// is written off as lost (defaults: `1260` seconds, `3`).
    pub lost_job_min: Duration,
    pub lost_job_duration_multiplier: u32,
    /// A job stuck queued for longer than this is written off as lost
    /// (default: `3600` seconds).
    pub callback_timeout: Duration,
    /// How long an errored task waits before it may be redispatched
    /// (default: `600` seconds).
    pub reprocessing_wait: Duration,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                  |
    /// |-------------------------------|--------------------------|
    /// | `MAX_ERROR_COUNT`             | `3`                      |
    /// | `POLL_INTERVAL_SECS`          | `10`                     |
    /// | `NOMAD_URL`                   | `http://localhost:4646`  |
    /// | `SCAN_WINDOW_DAYS`            | `30`                     |
    /// | `LOST_JOB_MIN_SECS`           | `1260`                   |
    /// | `LOST_JOB_DURATION_MULTIPLIER`| `3`                      |
    /// | `CALLBACK_TIMEOUT_SECS`       | `3600`                   |
    /// | `REPROCESSING_WAIT_SECS`      | `600`                    |
    pub fn from_env() -> Self {
        let max_error_count: i64 = std::env::var("MAX_ERROR_COUNT")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("MAX_ERROR_COUNT must be a valid i64");

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let nomad_url =
            std::env::var("NOMAD_URL").unwrap_or_else(|_| "http://localhost:4646".into());

        let scan_window_days: i32 = std::env::var("SCAN_WINDOW_DAYS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SCAN_WINDOW_DAYS must be a valid i32");

        let lost_job_min_secs: u64 = std::env::var("LOST_JOB_MIN_SECS")
            .unwrap_or_else(|_| "1260".into())
            .parse()
            .expect("LOST_JOB_MIN_SECS must be a valid u64");

        let lost_job_duration_multiplier: u32 = std::env::var("LOST_JOB_DURATION_MULTIPLIER")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("LOST_JOB_DURATION_MULTIPLIER must be a valid u32");

        let callback_timeout_secs: u64 = std::env::var("CALLBACK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("CALLBACK_TIMEOUT_SECS must be a valid u64");

        let reprocessing_wait_secs: u64 = std::env::var("REPROCESSING_WAIT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("REPROCESSING_WAIT_SECS must be a valid u64");

        Self {
            max_error_count,
            poll_interval: Duration::from_secs(poll_interval_secs),
            nomad_url,
            scan_window_days,
            lost_job_min: Duration::from_secs(lost_job_min_secs),
            lost_job_duration_multiplier,
            callback_timeout: Duration::from_secs(callback_timeout_secs),
            reprocessing_wait: Duration::from_secs(reprocessing_wait_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_error_count: 3,
            poll_interval: Duration::from_secs(10),
            nomad_url: "http://localhost:4646".into(),
            scan_window_days: 30,
            lost_job_min: Duration::from_secs(1260),
            lost_job_duration_multiplier: 3,
            callback_timeout: Duration::from_secs(3600),
            reprocessing_wait: Duration::from_secs(600),
        }
    }
}
