//! Application state for the payment HTTP server.
//!
//! Contains the shared services handlers call into:
//! - Payment store (status polling, readiness)
//! - Initiator (checkout creation)
//! - Return flow (pull reconciliation)
//! - Webhook ingress (push reconciliation)

use crate::initiation::{InitiationSettings, PaymentInitiator};
use crate::provider::PaymentProvider;
use crate::reconcile::{PaymentEnvironment, Reconciler};
use crate::return_flow::ReturnFlow;
use crate::store::PaymentStore;
use crate::webhook::WebhookIngress;
use std::sync::Arc;
use ticketing_core::environment::Clock;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply, via `Arc`) for each request. The return flow and the
/// webhook ingress share one [`Reconciler`], so both entry points apply
/// outcomes through the same locked path.
#[derive(Clone)]
pub struct AppState {
    /// Payment record store
    pub store: Arc<dyn PaymentStore>,
    /// Starts payments
    pub initiator: PaymentInitiator,
    /// Handles payers returning from checkout
    pub return_flow: ReturnFlow,
    /// Handles provider webhooks
    pub webhooks: WebhookIngress,
}

impl AppState {
    /// Wire the services together.
    ///
    /// # Arguments
    ///
    /// - `store`: payment record store
    /// - `provider`: payment provider client
    /// - `clock`: time source for `paid_at` fallbacks
    /// - `settings`: values copied into provider requests
    /// - `webhook_secret`: shared webhook secret; `None` rejects all webhooks
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        settings: InitiationSettings,
        webhook_secret: Option<String>,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&store), PaymentEnvironment::new(clock));
        Self {
            initiator: PaymentInitiator::new(Arc::clone(&store), Arc::clone(&provider), settings),
            return_flow: ReturnFlow::new(Arc::clone(&store), provider, reconciler.clone()),
            webhooks: WebhookIngress::new(reconciler, webhook_secret),
            store,
        }
    }
}
