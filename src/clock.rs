//! Wall-clock abstraction.
//!
//! Window indices and counter expiry are both derived from the current Unix
//! time. Everything that reads the time goes through [`Clock`] so tests can
//! step across window boundaries without sleeping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

/// Source of the current time, expressed as the duration since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Duration;
}

/// Clock backed by the system's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // Negative timestamps only happen on a clock set before 1970.
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Duration::from_millis(millis)
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same underlying time, so a clone handed to a store and
/// one kept by the test observe every `advance`.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<RwLock<Duration>>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            current: Arc::new(RwLock::new(start)),
        }
    }

    /// Start the clock at a whole number of seconds since the epoch.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn advance(&self, by: Duration) {
        *self.current.write() += by;
    }

    pub fn set(&self, to: Duration) {
        *self.current.write() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemClock.now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock::new().now() > Duration::from_secs(1_577_836_800));
    }

    #[test]
    fn test_manual_clock_advance_is_shared_between_clones() {
        let clock = ManualClock::at_secs(1_000);
        let other = clock.clone();

        clock.advance(Duration::from_secs(5));

        assert_eq!(other.now(), Duration::from_secs(1_005));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::at_secs(10);
        clock.set(Duration::from_millis(2_500));
        assert_eq!(clock.now(), Duration::from_millis(2_500));
    }
}
