//! Provider payload normalization.
//!
//! Webhooks arrive as `{ event, request_id, data: { .., transaction } }` while
//! a fetched payment is the bare `data` object. Both are classified the same
//! way, and either signal on its own is enough:
//!
//! | signal                                   | success           | failure                  |
//! |------------------------------------------|-------------------|--------------------------|
//! | `event`                                  | `payment.success` | `payment.failed`         |
//! | `data.status`, `data.transaction.status` | `completed`, `paid` | `failed`, `cancelled`  |
//!
//! Success is checked before failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const SUCCESS_EVENTS: &[&str] = &["payment.success"];
const FAILURE_EVENTS: &[&str] = &["payment.failed"];
const SUCCESS_STATUSES: &[&str] = &["completed", "paid"];
const FAILURE_STATUSES: &[&str] = &["failed", "cancelled", "canceled"];

/// Normalized provider outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Payment settled
    Paid,
    /// Payment failed or was cancelled
    Failed,
    /// Nothing conclusive yet
    Pending,
}

impl Outcome {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object holding payment fields: `data` for webhook envelopes, the
/// payload itself for fetched payments.
#[must_use]
pub fn payment_data(payload: &Value) -> &Value {
    match payload.get("data") {
        Some(data @ Value::Object(_)) => data,
        _ => payload,
    }
}

/// The embedded transaction object, if any.
#[must_use]
pub fn transaction(payload: &Value) -> Option<&Value> {
    payment_data(payload)
        .get("transaction")
        .filter(|tx| tx.is_object())
}

fn matches_any(value: Option<&Value>, sentinels: &[&str]) -> bool {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .is_some_and(|s| sentinels.iter().any(|sentinel| s.eq_ignore_ascii_case(sentinel)))
}

/// Classify a raw provider payload.
///
/// ```
/// use serde_json::json;
/// use ticketing::reconcile::{normalize, Outcome};
///
/// let webhook = json!({ "event": "payment.success", "data": { "reference": "RWB1" } });
/// assert_eq!(normalize(&webhook), Outcome::Paid);
///
/// let fetched = json!({ "id": "ps_1", "transaction": { "status": "cancelled" } });
/// assert_eq!(normalize(&fetched), Outcome::Failed);
///
/// assert_eq!(normalize(&json!({ "event": "payment.created" })), Outcome::Pending);
/// ```
#[must_use]
pub fn normalize(payload: &Value) -> Outcome {
    let event = payload.get("event");
    let data = payment_data(payload);
    let status = data.get("status");
    let tx_status = transaction(payload).and_then(|tx| tx.get("status"));

    if matches_any(event, SUCCESS_EVENTS)
        || matches_any(status, SUCCESS_STATUSES)
        || matches_any(tx_status, SUCCESS_STATUSES)
    {
        Outcome::Paid
    } else if matches_any(event, FAILURE_EVENTS)
        || matches_any(status, FAILURE_STATUSES)
        || matches_any(tx_status, FAILURE_STATUSES)
    {
        Outcome::Failed
    } else {
        Outcome::Pending
    }
}
