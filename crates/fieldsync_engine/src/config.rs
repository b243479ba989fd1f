//! Configuration for the sync engine and the binary cache.

use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed attempts after which an entry becomes `Failed`.
    pub max_retry: u32,
    /// Deadline for each remote call.
    pub request_timeout: Duration,
    /// Backoff between passes after a retryable failure.
    pub retry: RetryConfig,
    /// Interval for periodic background passes.
    pub sync_interval: Option<Duration>,
    /// Stop the action phase at the first retryable failure. Defaults to true.
    pub halt_on_retryable: bool,
    /// Maximum concurrent downloads.
    pub download_concurrency: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_retry: 3,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            sync_interval: None,
            halt_on_retryable: true,
            download_concurrency: 3,
        }
    }

    /// Sets the retry budget per entry.
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets whether a retryable failure halts the action phase.
    pub fn with_halt_on_retryable(mut self, halt: bool) -> Self {
        self.halt_on_retryable = halt;
        self
    }

    /// Sets the download concurrency (at least 1).
    pub fn with_download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = concurrency.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive pass attempts before the background
    /// job gives up until the next trigger.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for the downloaded-content cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding cached files.
    pub cache_dir: PathBuf,
    /// Entries downloaded longer ago than this are evicted.
    pub max_age: Duration,
    /// Total size the cache is trimmed to.
    pub max_size_bytes: u64,
}

impl CacheConfig {
    /// Creates a configuration with a 7 day age bound and a 500 MiB size bound.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_size_bytes: 500 * 1024 * 1024,
        }
    }

    /// Sets the age bound.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the size bound.
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_max_retry(5)
            .with_request_timeout(Duration::from_secs(10))
            .with_halt_on_retryable(false)
            .with_download_concurrency(0);

        assert_eq!(config.max_retry, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.halt_on_retryable);
        assert_eq!(config.download_concurrency, 1);
    }

    #[test]
    fn defaults_halt_on_retryable() {
        let config = SyncConfig::default();
        assert!(config.halt_on_retryable);
        assert_eq!(config.max_retry, 3);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn exponential_backoff_without_jitter() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400))
            .without_jitter();

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_secs(4));
        for _ in 0..20 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn cache_config_builder() {
        let config = CacheConfig::new("/tmp/cache")
            .with_max_age(Duration::from_secs(60))
            .with_max_size_bytes(1024);
        assert_eq!(config.max_age, Duration::from_secs(60));
        assert_eq!(config.max_size_bytes, 1024);
    }
}
