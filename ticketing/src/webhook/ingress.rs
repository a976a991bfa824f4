//! Webhook ingress pipeline.
//!
//! ```text
//! verify signature ──✗──► Rejected (403)
//!        │
//! parse JSON ──✗──► Ignored
//!        │
//! extract reference / provider id ──none──► Ignored
//!        │
//! lock payment, check request_id fence, apply outcome
//!        │
//!        ├─ no payment ──► UnknownPayment
//!        ├─ fence hit  ──► Duplicate
//!        └─ applied    ──► Processed
//! ```
//!
//! Everything after a valid signature is acknowledged, so the provider stops
//! retrying. Storage errors are logged and acknowledged as well; the return
//! flow and status polling pick those payments up later.

use super::signature::{verify_signature, SignatureError};
use crate::metrics;
use crate::provider::json_id;
use crate::reconcile::{PaymentAction, PaymentEvent, ReconcileSource, Reconciler};
use crate::store::PaymentLookup;
use crate::types::Reference;
use serde_json::Value;

/// How an authenticated delivery was handled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Outcome applied
    Processed {
        /// Reconciliation summary (`paid`, `failed`, `pending`, `unchanged`)
        outcome: &'static str,
    },
    /// Same `request_id` as the last processed delivery
    Duplicate,
    /// No payment matches the delivery
    UnknownPayment,
    /// Nothing actionable in the body
    Ignored {
        /// Why
        reason: &'static str,
    },
    /// Storage failed; nothing was committed
    Failed,
}

impl WebhookDisposition {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Duplicate => "duplicate",
            Self::UnknownPayment => "unknown",
            Self::Ignored { .. } => "ignored",
            Self::Failed => "error",
        }
    }
}

/// Identifiers pulled from a webhook body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryKeys {
    /// Payment lookup keys
    pub lookup: PaymentLookup,
    /// Delivery ID for the idempotency fence
    pub request_id: Option<String>,
}

/// Extract lookup keys and the delivery ID.
///
/// The reference comes from `data.reference`, `data.merchant_reference` or a
/// top-level `reference`, whichever is first present; a value that is not a
/// valid reference counts as absent. The provider ID comes from `data.id` or
/// `data.payment_id`.
#[must_use]
pub fn delivery_keys(payload: &Value) -> DeliveryKeys {
    let data = payload.get("data").filter(|d| d.is_object());
    let field = |name: &str| data.and_then(|d| d.get(name));

    let reference = [
        field("reference"),
        field("merchant_reference"),
        payload.get("reference"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str().and_then(|s| Reference::parse(s.trim()).ok()));

    let provider_id = json_id(field("id")).or_else(|| json_id(field("payment_id")));

    DeliveryKeys {
        lookup: PaymentLookup {
            reference,
            provider_id,
        },
        request_id: json_id(payload.get("request_id")),
    }
}

/// Authenticates and applies provider webhooks.
#[derive(Clone)]
pub struct WebhookIngress {
    reconciler: Reconciler,
    secret: Option<String>,
}

impl WebhookIngress {
    /// Creates a new `WebhookIngress`. Without a secret every delivery is
    /// rejected.
    #[must_use]
    pub const fn new(reconciler: Reconciler, secret: Option<String>) -> Self {
        Self { reconciler, secret }
    }

    /// Handle one delivery: the raw body and its signature header.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError`] if the delivery is not authenticated; the
    /// body is not even parsed in that case.
    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookDisposition, SignatureError> {
        if let Err(e) = verify_signature(body, signature, self.secret.as_deref()) {
            metrics::record_webhook_delivery("rejected");
            tracing::warn!(error = %e, "Webhook rejected");
            return Err(e);
        }

        let disposition = self.process(body).await;
        metrics::record_webhook_delivery(disposition.as_str());
        Ok(disposition)
    }

    async fn process(&self, body: &[u8]) -> WebhookDisposition {
        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Webhook body is not JSON, ignoring");
                return WebhookDisposition::Ignored {
                    reason: "malformed_json",
                };
            }
        };

        let keys = delivery_keys(&payload);
        let event = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if keys.lookup.is_empty() {
            tracing::info!(event = %event, "Webhook without payment identifiers, ignoring");
            return WebhookDisposition::Ignored {
                reason: "no_identifiers",
            };
        }

        tracing::info!(
            event = %event,
            reference = ?keys.lookup.reference,
            provider_id = ?keys.lookup.provider_id,
            request_id = ?keys.request_id,
            "Webhook received"
        );

        let result = self
            .reconciler
            .reconcile(
                &keys.lookup,
                PaymentAction::ReceiveWebhook {
                    request_id: keys.request_id.clone(),
                    payload,
                },
                ReconcileSource::Webhook,
            )
            .await;

        match result {
            Ok(None) => WebhookDisposition::UnknownPayment,
            Ok(Some(reconciliation))
                if reconciliation
                    .events
                    .iter()
                    .any(|e| matches!(e, PaymentEvent::DuplicateDelivery { .. })) =>
            {
                tracing::info!(request_id = ?keys.request_id, "Duplicate webhook delivery");
                WebhookDisposition::Duplicate
            }
            Ok(Some(reconciliation)) => WebhookDisposition::Processed {
                outcome: reconciliation.summary(),
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    reference = ?keys.lookup.reference,
                    "Webhook could not be applied"
                );
                WebhookDisposition::Failed
            }
        }
    }
}
