//! HTTP API handlers.
//!
//! - Payments: start, return landing, status polling
//! - Webhooks: provider notifications
//! - Orders: confirmation after payment

pub mod orders;
pub mod payments;
pub mod webhooks;

pub use orders::order_success;
pub use payments::{payment_return, payment_status, start_payment};
pub use webhooks::{paysuite_webhook, webhook_liveness};
