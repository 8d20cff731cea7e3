//! Engine configuration
//!
//! Defines the task service connection and the polling cadence.

use std::time::Duration;

/// Default delay between two status fetches of the same task
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Task service base URL (e.g., "http://localhost:8000")
    pub service_url: String,

    /// How often to fetch the status of the active task
    pub poll_interval: Duration,

    /// Give up on a task after polling it this long
    ///
    /// `None` polls until the task reaches a terminal status.
    pub task_timeout: Option<Duration>,

    /// Timeout applied to each individual HTTP request
    pub request_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(service_url: String) -> Self {
        Self {
            service_url,
            poll_interval: DEFAULT_POLL_INTERVAL,
            task_timeout: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - QUILL_SERVICE_URL (required)
    /// - QUILL_POLL_INTERVAL_MS (optional, milliseconds, default: 2000)
    /// - QUILL_TASK_TIMEOUT_SECS (optional, seconds, default: none)
    /// - QUILL_REQUEST_TIMEOUT_SECS (optional, seconds, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let service_url = std::env::var("QUILL_SERVICE_URL")
            .map_err(|_| anyhow::anyhow!("QUILL_SERVICE_URL environment variable not set"))?;

        let mut config = Self::new(service_url);

        if let Some(ms) = env_u64("QUILL_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }

        config.task_timeout = env_u64("QUILL_TASK_TIMEOUT_SECS").map(Duration::from_secs);

        if let Some(secs) = env_u64("QUILL_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Sets the task timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.service_url.is_empty() {
            anyhow::bail!("service_url cannot be empty");
        }

        if !self.service_url.starts_with("http://") && !self.service_url.starts_with("https://")
        {
            anyhow::bail!("service_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            anyhow::bail!("task_timeout must be greater than 0 when set");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("http://localhost:8000".to_string())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.task_timeout, None);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.service_url = String::new();
        assert!(config.validate().is_err());

        config.service_url = "localhost:8000".to_string();
        assert!(config.validate().is_err());

        config.service_url = "https://tasks.example.com".to_string();
        assert!(config.validate().is_ok());

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = DEFAULT_POLL_INTERVAL;

        config.task_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_task_timeout() {
        let config = Config::default().with_task_timeout(Duration::from_secs(600));
        assert_eq!(config.task_timeout, Some(Duration::from_secs(600)));
        assert!(config.validate().is_ok());
    }
}
