//! Axum integration for the ticketing payment service.
//!
//! This crate provides the HTTP plumbing that every handler shares, so the
//! application crate only contains request-to-domain translation:
//!
//! - [`AppError`]: JSON error envelope implementing `IntoResponse`
//! - [`correlation_id_layer`]: request span + `X-Correlation-ID` echo
//! - [`CorrelationId`]: extractor for the id in handlers
//! - [`handlers::health_check`]: liveness probe
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract data** from the request (query, headers, raw body)
//! 3. **Call** the domain service (initiation, reconciliation, webhook ingress)
//! 4. **Map result** to an HTTP response (redirect, JSON, or [`AppError`])

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
