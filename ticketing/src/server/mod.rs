//! HTTP server module for the payment service.
//!
//! - Application state wiring
//! - Readiness endpoint
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::readiness_check;
pub use routes::build_router;
pub use state::AppState;
