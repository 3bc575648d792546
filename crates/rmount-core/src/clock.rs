//! Time source used by retry back-off.
//!
//! Flush retries never read the global clock directly; they go through a
//! [`Clock`] so tests can run back-off schedules instantly with
//! [`ManualClock`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Source of monotonic time and delays.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time immediately and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            origin: Instant::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().elapsed += duration;
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_without_waiting() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(3600)).await;
        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now() - start, Duration::from_secs(3605));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(3600), Duration::from_secs(5)]
        );
    }

    #[test]
    fn test_manual_clock_advance_not_recorded() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_sleep_uses_tokio_timer() {
        let clock = SystemClock;
        let before = tokio::time::Instant::now();
        clock.sleep(Duration::from_secs(10)).await;
        assert!(tokio::time::Instant::now() - before >= Duration::from_secs(10));
    }
}
