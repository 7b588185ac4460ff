//! # Turnstile Testing
//!
//! Testing utilities and helpers for Turnstile reducers.
//!
//! This crate provides:
//! - Deterministic clocks for freshness-window tests
//! - The [`ReducerTest`] Given-When-Then harness
//! - Assertion helpers for reducer effects
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(ScanReducer::new())
//!     .with_env(test_environment(test_clock()))
//!     .given_state(ScanState::default())
//!     .when_action(ScanAction::CodeDecoded { raw_text: "not json".into() })
//!     .then_state(|state| assert_eq!(state.history.len(), 1))
//!     .run();
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use turnstile_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, TimeZone, Utc};
    use std::sync::{PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::FixedClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// Create a fixed clock from milliseconds since the Unix epoch
        ///
        /// Out-of-range values fall back to the epoch itself.
        #[must_use]
        pub fn at_millis(millis: i64) -> Self {
            Self::new(
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .unwrap_or_default(),
            )
        }

        /// The pinned time in milliseconds since the Unix epoch
        #[must_use]
        pub fn millis(&self) -> i64 {
            self.time.timestamp_millis()
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when the test tells it to
    ///
    /// Shared between a test and the environment under test (wrap in `Arc`).
    #[derive(Debug)]
    pub struct ManualClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock forward (or backward, with a negative duration)
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::at_millis(1_735_689_600_000)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn fixed_clock_round_trips_millis() {
        let clock = FixedClock::at_millis(1_700_000_000_123);
        assert_eq!(clock.millis(), 1_700_000_000_123);
        assert_eq!(clock.now().timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(test_clock().now());
        let start = clock.now();
        clock.advance(Duration::seconds(61));
        assert_eq!(clock.now() - start, Duration::seconds(61));
    }
}
