//! Retry utilities with exponential backoff.
//!
//! Used by the validation pipeline for DNS lookups: transient failures
//! (timeouts, SERVFAIL) are retried with jittered exponential backoff while
//! permanent answers such as NXDOMAIN return immediately.

use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries (for exponential backoff)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Errors that can say whether repeating the operation may help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Policy for determining if an operation should be retried
pub trait RetryPolicy<E> {
    /// Returns true if the operation should be retried for this error
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// DNS retry policy: only transient resolution failures are retried.
pub struct DnsRetryPolicy;

impl<E: Transient> RetryPolicy<E> for DnsRetryPolicy {
    fn should_retry(&self, error: &E, _attempt: u32) -> bool {
        error.is_transient()
    }
}

/// Result of a retried operation plus the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Retry executor that handles the retry logic
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying per `policy`, and report how many attempts ran.
    pub async fn execute_counted<F, Fut, T, E, P>(
        &self,
        operation: F,
        policy: P,
    ) -> Attempted<T, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: RetryPolicy<E>,
    {
        let mut delay = self.config.initial_delay;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(error) => error,
            };

            if attempts > self.config.max_attempts || !policy.should_retry(&error, attempts - 1) {
                return Attempted {
                    result: Err(error),
                    attempts,
                };
            }

            let actual_delay = if self.config.jitter {
                add_jitter(delay)
            } else {
                delay
            };
            sleep(actual_delay).await;

            delay = std::cmp::min(
                Duration::from_millis(
                    (delay.as_millis() as f64 * self.config.backoff_multiplier) as u64,
                ),
                self.config.max_delay,
            );
        }
    }
}

/// Add random jitter to prevent thundering herd problems
fn add_jitter(delay: Duration) -> Duration {
    use rand::Rng;

    let jitter_range = delay.as_millis() as f64 * 0.1; // 10% jitter
    if jitter_range <= 0.0 {
        return delay;
    }
    let mut rng = rand::rng();
    let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);

    let jittered_ms = (delay.as_millis() as f64 + jitter).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}

/// Builder pattern for creating retry configurations
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    /// Set the maximum number of retry attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the initial delay between retries
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
