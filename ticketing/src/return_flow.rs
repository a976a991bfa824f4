//! Return-flow reconciliation (pull).
//!
//! When the payer lands back on `/payments/return`, the webhook may not have
//! arrived yet. Instead of waiting, ask the provider for the current state and
//! apply it through the same [`Reconciler`] the webhook uses. Anything
//! inconclusive, including a provider error, is reported as "verifying" and
//! changes nothing.

use crate::provider::PaymentProvider;
use crate::reconcile::{PaymentAction, ReconcileSource, Reconciler};
use crate::store::{PaymentLookup, PaymentStore, StoreError};
use crate::types::{PaymentStatus, Reference, TicketCode};
use std::sync::Arc;
use thiserror::Error;

/// Return-flow errors
#[derive(Debug, Error)]
pub enum ReturnFlowError {
    /// No payment has this reference
    #[error("payment {0} not found")]
    NotFound(String),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to show the returning payer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Not settled yet (or unknown); poll again later
    Verifying {
        /// Reference to poll with, when known
        reference: Option<Reference>,
    },
    /// Paid; show the ticket
    Paid {
        /// Ticket to show
        ticket_code: TicketCode,
    },
    /// The attempt failed; the payer may start again
    Failed {
        /// Reference of the failed attempt
        reference: Reference,
    },
}

/// Handles payers returning from the hosted checkout.
#[derive(Clone)]
pub struct ReturnFlow {
    store: Arc<dyn PaymentStore>,
    provider: Arc<dyn PaymentProvider>,
    reconciler: Reconciler,
}

impl ReturnFlow {
    /// Creates a new `ReturnFlow`
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            store,
            provider,
            reconciler,
        }
    }

    /// Reconcile the payment identified by `reference`, if possible.
    ///
    /// # Errors
    ///
    /// Returns [`ReturnFlowError::NotFound`] for an unknown reference and
    /// [`ReturnFlowError::Store`] if storage fails. Provider failures are not
    /// errors here.
    pub async fn handle(&self, reference: Option<&str>) -> Result<ReturnOutcome, ReturnFlowError> {
        let Some(raw_reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(ReturnOutcome::Verifying { reference: None });
        };
        let reference = Reference::parse(raw_reference)
            .map_err(|_| ReturnFlowError::NotFound(raw_reference.to_string()))?;

        let record = self
            .store
            .payment_by_reference(&reference)
            .await?
            .ok_or_else(|| ReturnFlowError::NotFound(reference.to_string()))?;

        let registration = self.store.registration(record.registration_id).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("payment {} has no registration", record.id))
        })?;
        let ticket_code = registration.ticket_code;
        if record.status.is_paid() || registration.payment_status.is_paid() {
            tracing::info!(%reference, "Returning payer already paid");
            return Ok(ReturnOutcome::Paid { ticket_code });
        }

        let Some(provider_id) = record.provider_id.clone() else {
            tracing::info!(%reference, "No provider payment yet, verifying");
            return Ok(ReturnOutcome::Verifying {
                reference: Some(reference),
            });
        };

        let remote = match self.provider.fetch_payment_state(provider_id).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(%reference, error = %e, "Remote state unavailable, verifying");
                return Ok(ReturnOutcome::Verifying {
                    reference: Some(reference),
                });
            }
        };

        let reconciliation = self
            .reconciler
            .reconcile(
                &PaymentLookup::by_reference(reference.clone()),
                PaymentAction::ApplyRemoteState { payload: remote.raw },
                ReconcileSource::ReturnFlow,
            )
            .await?
            .ok_or_else(|| ReturnFlowError::NotFound(reference.to_string()))?;

        Ok(match reconciliation.state.record.status {
            PaymentStatus::Paid => ReturnOutcome::Paid { ticket_code },
            PaymentStatus::Failed => ReturnOutcome::Failed { reference },
            PaymentStatus::Pending | PaymentStatus::Refunded => ReturnOutcome::Verifying {
                reference: Some(reference),
            },
        })
    }
}
