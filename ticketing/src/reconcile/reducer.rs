//! Outcome application.
//!
//! [`PaymentReducer`] is the only code that changes a payment's status. It
//! runs on a [`LockedPayment`] while the store holds the row lock, so every
//! rule below is evaluated against the latest committed state:
//!
//! - the raw payload is always replaced, except for fenced duplicates
//! - `PAID` never regresses; `FAILED` may still become `PAID`
//! - the registration's payment status follows the payment in the same
//!   transaction, and is never moved away from `PAID`

use super::outcome::{normalize, payment_data, transaction, Outcome};
use crate::provider::json_id;
use crate::store::LockedPayment;
use crate::types::{PaymentMethod, PaymentStatus, RegistrationPaymentStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use ticketing_core::environment::Clock;
use ticketing_core::reducer::Reducer;

/// Inputs to the payment reducer.
#[derive(Clone, Debug, PartialEq)]
pub enum PaymentAction {
    /// Remote state fetched from the provider (return flow)
    ApplyRemoteState {
        /// Provider `data` object
        payload: Value,
    },
    /// Authenticated webhook delivery
    ReceiveWebhook {
        /// Delivery ID used as the idempotency fence
        request_id: Option<String>,
        /// Full webhook body
        payload: Value,
    },
}

/// What the reducer did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEvent {
    /// Webhook delivery already processed; nothing changed
    DuplicateDelivery {
        /// The repeated delivery ID
        request_id: String,
    },
    /// Payload stored and classified
    PayloadRecorded {
        /// Normalized outcome of the payload
        outcome: Outcome,
    },
    /// Payment moved to `PAID`
    MarkedPaid {
        /// Provider settlement ID, if known
        transaction_id: Option<String>,
        /// Settlement time
        paid_at: DateTime<Utc>,
    },
    /// Payment moved to `FAILED`
    MarkedFailed,
    /// Outcome did not change the payment status
    Unchanged {
        /// Status the payment keeps
        status: PaymentStatus,
    },
    /// Registration payment status cascaded from the payment
    RegistrationUpdated {
        /// New registration payment status
        status: RegistrationPaymentStatus,
    },
}

/// Reducer environment.
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Source of reconciliation time
    pub clock: Arc<dyn Clock>,
}

impl PaymentEnvironment {
    /// Creates a new `PaymentEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer applying provider outcomes to a locked payment.
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentReducer;

impl PaymentReducer {
    /// Creates a new `PaymentReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn apply_payload(
        state: &mut LockedPayment,
        payload: Value,
        env: &PaymentEnvironment,
        events: &mut SmallVec<[PaymentEvent; 4]>,
    ) {
        let outcome = normalize(&payload);
        match outcome {
            Outcome::Paid => Self::apply_paid(state, &payload, env, events),
            Outcome::Failed => Self::apply_failed(state, events),
            Outcome::Pending => events.push(PaymentEvent::Unchanged {
                status: state.record.status,
            }),
        }

        state.record.raw_provider_payload = Some(payload);
        events.insert(0, PaymentEvent::PayloadRecorded { outcome });
    }

    fn apply_paid(
        state: &mut LockedPayment,
        payload: &Value,
        env: &PaymentEnvironment,
        events: &mut SmallVec<[PaymentEvent; 4]>,
    ) {
        let record = &mut state.record;
        match record.status {
            PaymentStatus::Paid => {
                events.push(PaymentEvent::Unchanged {
                    status: PaymentStatus::Paid,
                });
                cascade(state, RegistrationPaymentStatus::Paid, events);
            }
            PaymentStatus::Refunded => events.push(PaymentEvent::Unchanged {
                status: PaymentStatus::Refunded,
            }),
            PaymentStatus::Pending | PaymentStatus::Failed => {
                let tx = transaction(payload);
                let data = payment_data(payload);

                if let Some(method) = tx
                    .and_then(|tx| tx.get("method"))
                    .and_then(Value::as_str)
                    .and_then(|m| m.parse::<PaymentMethod>().ok())
                {
                    record.method = Some(method);
                }
                if let Some(transaction_id) = tx.and_then(|tx| {
                    json_id(tx.get("id")).or_else(|| json_id(tx.get("transaction_id")))
                }) {
                    record.transaction_id = Some(transaction_id);
                }
                let paid_at = parse_timestamp(tx.and_then(|tx| tx.get("paid_at")))
                    .or_else(|| parse_timestamp(data.get("paid_at")))
                    .unwrap_or_else(|| env.clock.now());

                record.status = PaymentStatus::Paid;
                record.paid_at = Some(paid_at);
                events.push(PaymentEvent::MarkedPaid {
                    transaction_id: record.transaction_id.clone(),
                    paid_at,
                });
                cascade(state, RegistrationPaymentStatus::Paid, events);
            }
        }
    }

    fn apply_failed(state: &mut LockedPayment, events: &mut SmallVec<[PaymentEvent; 4]>) {
        match state.record.status {
            PaymentStatus::Pending => {
                state.record.status = PaymentStatus::Failed;
                events.push(PaymentEvent::MarkedFailed);
                cascade(state, RegistrationPaymentStatus::Failed, events);
            }
            PaymentStatus::Failed => {
                events.push(PaymentEvent::Unchanged {
                    status: PaymentStatus::Failed,
                });
                cascade(state, RegistrationPaymentStatus::Failed, events);
            }
            status @ (PaymentStatus::Paid | PaymentStatus::Refunded) => {
                events.push(PaymentEvent::Unchanged { status });
            }
        }
    }
}

/// Move the registration's payment status to `target`. A paid registration
/// only ever moves to paid.
fn cascade(
    state: &mut LockedPayment,
    target: RegistrationPaymentStatus,
    events: &mut SmallVec<[PaymentEvent; 4]>,
) {
    let current = state.registration_payment_status;
    if current == target || (current.is_paid() && !target.is_paid()) {
        return;
    }
    state.registration_payment_status = target;
    events.push(PaymentEvent::RegistrationUpdated { status: target });
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

impl Reducer for PaymentReducer {
    type State = LockedPayment;
    type Action = PaymentAction;
    type Environment = PaymentEnvironment;
    type Event = PaymentEvent;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Self::Event; 4]> {
        match action {
            PaymentAction::ApplyRemoteState { payload } => {
                let mut events = SmallVec::new();
                Self::apply_payload(state, payload, env, &mut events);
                events
            }
            PaymentAction::ReceiveWebhook {
                request_id,
                payload,
            } => {
                if let Some(request_id) = request_id {
                    if state.record.last_webhook_request_id.as_deref() == Some(request_id.as_str()) {
                        return smallvec![PaymentEvent::DuplicateDelivery { request_id }];
                    }
                    state.record.last_webhook_request_id = Some(request_id);
                }
                let mut events = SmallVec::new();
                Self::apply_payload(state, payload, env, &mut events);
                events
            }
        }
    }
}

/// Single label summarizing a reduction, for logs and metrics.
#[must_use]
pub fn summarize(events: &[PaymentEvent]) -> &'static str {
    let mut label = "pending";
    for event in events {
        match event {
            PaymentEvent::DuplicateDelivery { .. } => return "duplicate",
            PaymentEvent::MarkedPaid { .. } => return "paid",
            PaymentEvent::MarkedFailed => return "failed",
            PaymentEvent::Unchanged { status } if *status != PaymentStatus::Pending => {
                label = "unchanged";
            }
            _ => {}
        }
    }
    label
}
