//! Payment reconciliation for event registrations.
//!
//! Registrations for paid events are settled through PaySuite, a hosted
//! checkout provider. This crate starts checkouts and keeps the local payment
//! record in sync with the provider, whichever way the outcome arrives first.
//!
//! # Architecture
//!
//! ```text
//!   GET /payments/start          POST /payments/webhook    GET /payments/return
//!          │                             │ (push)                 │ (pull)
//!          ▼                             ▼                        ▼
//! ┌──────────────────┐        ┌──────────────────┐     ┌──────────────────┐
//! │ PaymentInitiator │        │  WebhookIngress  │     │    ReturnFlow    │
//! └──────────────────┘        └──────────────────┘     └──────────────────┘
//!     │         │                        │                        │
//!     │         ▼                        └──────────┬─────────────┘
//!     │   PaymentProvider ◄────── fetch ────────────┼─────────────┘
//!     │                                             ▼
//!     │                                  ┌──────────────────┐
//!     │                                  │    Reconciler    │ lock row,
//!     │                                  │  PaymentReducer  │ reduce, commit
//!     │                                  └──────────────────┘
//!     ▼                                             │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  PaymentStore (Postgres / memory)                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! ## 1. Exactly-once settlement
//!
//! Webhooks and the return flow both apply outcomes through
//! [`reconcile::Reconciler`], which holds the payment row lock while the
//! reducer runs. A payment becomes `PAID` once, and never leaves `PAID`.
//!
//! ## 2. Idempotent webhooks
//!
//! The delivery `request_id` is fenced on the payment row in the same
//! transaction as the outcome, so a redelivery changes nothing.
//!
//! ## 3. Provider failures are transient
//!
//! A provider error or timeout never marks a payment `FAILED`; only an
//! explicit failure from the provider does.
//!
//! # Usage
//!
//! See [`server::build_router`] for the HTTP surface and the
//! [`reconcile::reducer`] module for the state transitions and their tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod initiation;
pub mod metrics;
pub mod provider;
pub mod reconcile;
pub mod return_flow;
pub mod server;
pub mod status;
pub mod store;
pub mod types;
pub mod webhook;

pub use config::Config;
pub use initiation::{InitiationError, InitiationOutcome, PaymentInitiator};
pub use provider::{PaySuiteClient, PaymentProvider, ProviderError};
pub use reconcile::{Outcome, Reconciler};
pub use return_flow::{ReturnFlow, ReturnOutcome};
pub use store::{InMemoryPaymentStore, PaymentStore, PostgresPaymentStore, StoreError};
pub use types::*;
pub use webhook::WebhookIngress;
