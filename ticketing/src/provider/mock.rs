//! Scripted payment provider for development and tests.
//!
//! Creation succeeds by default with a provider ID derived from the
//! reference. Remote state is whatever was scripted with
//! [`MockPaymentProvider::set_remote_state`], or a pending payment.

use super::{
    CreatedPayment, PaymentProvider, PaymentRequest, ProviderError, ProviderFuture,
    ProviderResult, RemotePaymentState,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    create_script: VecDeque<ProviderResult<CreatedPayment>>,
    remote_states: HashMap<String, ProviderResult<Value>>,
    create_calls: Vec<PaymentRequest>,
    fetch_calls: Vec<String>,
}

/// Mock payment provider
///
/// Clones share the same script and call log.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentProvider {
    state: Arc<Mutex<MockState>>,
    latency: Option<Duration>,
}

impl MockPaymentProvider {
    /// Creates a new mock provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to widen race windows in concurrency tests.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Provider ID the default creation response assigns to a reference.
    #[must_use]
    pub fn provider_id_for(reference: &str) -> String {
        format!("ps_{reference}")
    }

    /// Queue the result of the next creation call.
    pub fn script_create(&self, result: ProviderResult<CreatedPayment>) {
        if let Ok(mut state) = self.state.lock() {
            state.create_script.push_back(result);
        }
    }

    /// Script what fetching `provider_id` returns.
    pub fn set_remote_state(&self, provider_id: &str, state: ProviderResult<Value>) {
        if let Ok(mut guard) = self.state.lock() {
            guard.remote_states.insert(provider_id.to_string(), state);
        }
    }

    /// Creation requests received so far.
    #[must_use]
    pub fn create_calls(&self) -> Vec<PaymentRequest> {
        self.state
            .lock()
            .map(|state| state.create_calls.clone())
            .unwrap_or_default()
    }

    /// Number of fetch calls received so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().map(|state| state.fetch_calls.len()).unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn poisoned() -> ProviderError {
    ProviderError::Transport("mock provider state poisoned".to_string())
}

impl PaymentProvider for MockPaymentProvider {
    fn create_payment_request(&self, request: PaymentRequest) -> ProviderFuture<'_, CreatedPayment> {
        Box::pin(async move {
            self.simulate_latency().await;

            let scripted = {
                let mut state = self.state.lock().map_err(|_| poisoned())?;
                state.create_calls.push(request.clone());
                state.create_script.pop_front()
            };

            scripted.unwrap_or_else(|| {
                let provider_id = Self::provider_id_for(request.reference.as_str());
                let checkout_url = format!("https://checkout.paysuite.test/{provider_id}");
                tracing::info!(
                    reference = %request.reference,
                    provider_id = %provider_id,
                    "Mock payment request created"
                );
                Ok(CreatedPayment {
                    raw: json!({
                        "id": provider_id,
                        "reference": request.reference.as_str(),
                        "amount": request.amount.to_decimal_string(),
                        "checkout_url": checkout_url,
                    }),
                    provider_id,
                    checkout_url: Some(checkout_url),
                })
            })
        })
    }

    fn fetch_payment_state(&self, provider_id: String) -> ProviderFuture<'_, RemotePaymentState> {
        Box::pin(async move {
            self.simulate_latency().await;

            let scripted = {
                let mut state = self.state.lock().map_err(|_| poisoned())?;
                state.fetch_calls.push(provider_id.clone());
                state.remote_states.get(&provider_id).cloned()
            };

            match scripted {
                Some(Ok(raw)) => Ok(RemotePaymentState { raw }),
                Some(Err(e)) => Err(e),
                None => Ok(RemotePaymentState {
                    raw: json!({ "id": provider_id, "status": "pending" }),
                }),
            }
        })
    }
}
