//! Payment reconciliation.
//!
//! Webhook ingress (push) and the return flow (pull) both end here. They
//! build a [`PaymentAction`] and call [`Reconciler::reconcile`], which locks
//! the payment row, runs the [`PaymentReducer`] on it, and commits the result
//! in one transaction. Concurrent calls for the same payment serialize on the
//! row lock, so the `PAID` transition happens exactly once.

pub mod outcome;
pub mod reducer;

pub use outcome::{normalize, Outcome};
pub use reducer::{summarize, PaymentAction, PaymentEnvironment, PaymentEvent, PaymentReducer};

use crate::metrics;
use crate::store::{LockedPayment, PaymentLookup, PaymentStore, StoreError};
use smallvec::SmallVec;
use std::sync::Arc;
use ticketing_core::reducer::Reducer;

/// Which entry point triggered a reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileSource {
    /// Provider webhook
    Webhook,
    /// Payer returning from checkout
    ReturnFlow,
}

impl ReconcileSource {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::ReturnFlow => "return",
        }
    }
}

/// Result of one reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    /// Payment and registration state after the commit
    pub state: LockedPayment,
    /// What the reducer did
    pub events: SmallVec<[PaymentEvent; 4]>,
}

impl Reconciliation {
    /// Summary label (`paid`, `failed`, `pending`, `unchanged`, `duplicate`).
    #[must_use]
    pub fn summary(&self) -> &'static str {
        summarize(&self.events)
    }
}

/// Shared entry point for applying provider outcomes.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    reducer: PaymentReducer,
    env: PaymentEnvironment,
}

impl Reconciler {
    /// Creates a new `Reconciler`
    #[must_use]
    pub fn new(store: Arc<dyn PaymentStore>, env: PaymentEnvironment) -> Self {
        Self {
            store,
            reducer: PaymentReducer::new(),
            env,
        }
    }

    /// Apply `action` to the payment matched by `lookup`.
    ///
    /// Returns `None` if no payment matches.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails; nothing is committed in that case.
    pub async fn reconcile(
        &self,
        lookup: &PaymentLookup,
        action: PaymentAction,
        source: ReconcileSource,
    ) -> Result<Option<Reconciliation>, StoreError> {
        let reducer = self.reducer;
        let env = &self.env;
        let mut events = SmallVec::new();
        let sink = &mut events;

        let locked = self
            .store
            .with_locked_payment(
                lookup,
                Box::new(move |state: &mut LockedPayment| {
                    *sink = reducer.reduce(state, action, env);
                }),
            )
            .await?;

        let Some(state) = locked else {
            tracing::info!(
                source = source.as_str(),
                reference = ?lookup.reference,
                provider_id = ?lookup.provider_id,
                "No payment matches reconciliation lookup"
            );
            return Ok(None);
        };

        let reconciliation = Reconciliation { state, events };

        let summary = reconciliation.summary();
        metrics::record_reconciliation(source.as_str(), summary);
        tracing::info!(
            source = source.as_str(),
            reference = %reconciliation.state.record.reference,
            outcome = summary,
            status = %reconciliation.state.record.status,
            registration_payment_status = %reconciliation.state.registration_payment_status,
            "Payment reconciled"
        );

        Ok(Some(reconciliation))
    }
}
