//! # Ticketing Core
//!
//! Core traits shared by the ticketing workspace.
//!
//! The payment service keeps its decision logic in pure reducers and pushes all
//! I/O (database transactions, provider HTTP calls) to the edges:
//!
//! - **State**: the data a reducer is allowed to change (e.g. a locked payment row)
//! - **Action**: an input to the reducer (an observed provider outcome, a webhook delivery)
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Events)`
//! - **Event**: a fact describing what the reducer did, used by callers for
//!   responses, logging and metrics
//! - **Environment**: injected dependencies (the clock)
//!
//! ## Example
//!
//! ```
//! use ticketing_core::reducer::Reducer;
//! use ticketing_core::SmallVec;
//!
//! struct Counter;
//!
//! impl Reducer for Counter {
//!     type State = u32;
//!     type Action = u32;
//!     type Environment = ();
//!     type Event = u32;
//!
//!     fn reduce(&self, state: &mut u32, action: u32, _env: &()) -> SmallVec<[u32; 4]> {
//!         *state += action;
//!         SmallVec::from_elem(*state, 1)
//!     }
//! }
//!
//! let mut total = 1;
//! let events = Counter.reduce(&mut total, 2, &());
//! assert_eq!(total, 3);
//! assert_eq!(events.as_slice(), &[3]);
//! ```

pub use chrono::{DateTime, Utc};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - the core trait for business logic
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Event`: The facts this reducer reports back to its caller
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The event type describing what happened
        type Event;

        /// Reduce an action into state changes and events
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns the facts that were recorded
        ///
        /// Reducers never perform I/O. Persisting the mutated state is the
        /// caller's job, which lets the caller hold a lock or a transaction
        /// around the call.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Self::Event; 4]>;
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use ticketing_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = chrono::Utc::now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
