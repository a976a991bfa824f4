//! # Ticketing Testing
//!
//! Testing utilities for the ticketing workspace.
//!
//! This crate provides:
//! - A fixed clock for deterministic timestamps
//! - A Given-When-Then harness for reducers
//! - Assertion helpers for reducer events
//!
//! ## Example
//!
//! ```ignore
//! use ticketing_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(PaymentReducer::new())
//!     .with_env(PaymentEnvironment::new(Arc::new(test_clock())))
//!     .given_state(locked_pending_payment())
//!     .when_action(PaymentAction::ApplyRemoteState { payload })
//!     .then_state(|state| assert!(state.record.status.is_paid()))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use ticketing_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticketing_testing::mocks::FixedClock;
    /// use ticketing_core::environment::Clock;
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
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock};
pub use reducer_test::{assertions, ReducerTest};
