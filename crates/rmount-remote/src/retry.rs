use std::sync::Arc;
use std::time::{Duration, Instant};

use rmount_config::{BackoffStrategy, RetryConfig};
use rmount_core::Clock;

/// Decides whether a failed operation is attempted again, and after how long.
pub trait RetryScheduler: Send + Sync + 'static {
    /// `attempt` is the number of failed attempts so far (1 after the first
    /// failure); `elapsed` is the time since the operation started.
    /// Returns the delay before the next attempt, or `None` to give up.
    fn should_retry(&self, attempt: u32, elapsed: Duration) -> Option<Duration>;
}

/// Compute the backoff duration for a given retry attempt.
pub fn compute_backoff(base: Duration, attempt: u32, strategy: BackoffStrategy) -> Duration {
    match strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt.saturating_add(1)),
        BackoffStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt)),
    }
}

/// Bounded back-off: gives up after `max_attempts` failures or once
/// `time_limit` has elapsed, whichever comes first.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub time_limit: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::from_config(&RetryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        BackoffPolicy {
            max_attempts: config.max_attempts,
            time_limit: config.time_limit.as_duration(),
            min_delay: config.min_delay.as_duration(),
            max_delay: config.max_delay.as_duration(),
            strategy: config.backoff,
        }
    }
}

impl RetryScheduler for BackoffPolicy {
    fn should_retry(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if attempt >= self.max_attempts || elapsed >= self.time_limit {
            return None;
        }
        let delay = compute_backoff(
            self.min_delay,
            attempt.saturating_sub(1),
            self.strategy,
        );
        Some(delay.min(self.max_delay.max(self.min_delay)))
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryScheduler for NoRetry {
    fn should_retry(&self, _attempt: u32, _elapsed: Duration) -> Option<Duration> {
        None
    }
}

/// Attempt counter and start instant of one retried operation.
pub struct RetryState {
    clock: Arc<dyn Clock>,
    started: Instant,
    attempts: u32,
}

impl RetryState {
    /// Begin a new operation at the clock's current time.
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        RetryState {
            clock,
            started,
            attempts: 0,
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and ask `scheduler` for the next delay.
    pub fn next_delay(&mut self, scheduler: &dyn RetryScheduler) -> Option<Duration> {
        self.attempts += 1;
        let elapsed = self.clock.now().saturating_duration_since(self.started);
        scheduler.should_retry(self.attempts, elapsed)
    }
}
