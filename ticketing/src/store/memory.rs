//! In-memory payment store for tests and local experiments.
//!
//! A single mutex stands in for the row lock: mutations run while it is held,
//! so concurrent callers are serialized exactly like `SELECT ... FOR UPDATE`.

use super::{CheckoutAttachment, LockedPayment, PaymentLookup, PaymentMutation, PaymentStore, StoreError};
use crate::types::{
    NewPayment, PaymentId, PaymentRecord, PaymentStatus, Reference, Registration, RegistrationId,
    RegistrationPaymentStatus, TicketCode,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct State {
    registrations: HashMap<RegistrationId, Registration>,
    payments: HashMap<PaymentId, PaymentRecord>,
}

impl State {
    fn find(&self, lookup: &PaymentLookup) -> Option<PaymentId> {
        let by_reference = lookup.reference.as_ref().and_then(|reference| {
            self.payments
                .values()
                .find(|p| &p.reference == reference)
                .map(|p| p.id)
        });
        by_reference.or_else(|| {
            lookup.provider_id.as_ref().and_then(|provider_id| {
                self.payments
                    .values()
                    .find(|p| p.provider_id.as_ref() == Some(provider_id))
                    .map(|p| p.id)
            })
        })
    }
}

/// In-memory payment store
///
/// Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryPaymentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a registration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the lock is poisoned.
    pub fn insert_registration(&self, registration: Registration) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        state.registrations.insert(registration.id, registration);
        Ok(())
    }

    /// Number of payment records, for assertions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if the lock is poisoned.
    pub fn payment_count(&self) -> Result<usize, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state.payments.len())
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.state.lock().map(|_| ()).map_err(|_| StoreError::Poisoned)
    }

    async fn registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state.registrations.get(&id).cloned())
    }

    async fn registration_by_ticket_code(
        &self,
        ticket_code: &TicketCode,
    ) -> Result<Option<Registration>, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .registrations
            .values()
            .find(|r| &r.ticket_code == ticket_code)
            .cloned())
    }

    async fn set_registration_payment_status(
        &self,
        id: RegistrationId,
        status: RegistrationPaymentStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(registration) = state.registrations.get_mut(&id) {
            registration.payment_status = status;
        }
        Ok(())
    }

    async fn get_or_create_payment(&self, new: NewPayment) -> Result<(PaymentRecord, bool), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;

        if let Some(existing) = state
            .payments
            .values()
            .find(|p| p.registration_id == new.registration_id)
        {
            return Ok((existing.clone(), false));
        }
        if state.payments.values().any(|p| p.reference == new.reference) {
            return Err(StoreError::Conflict(format!(
                "reference {} belongs to another registration",
                new.reference
            )));
        }

        let record = PaymentRecord::pending(new, Utc::now());
        state.payments.insert(record.id, record.clone());
        Ok((record, true))
    }

    async fn attach_checkout(
        &self,
        id: PaymentId,
        checkout: CheckoutAttachment,
    ) -> Result<PaymentRecord, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        let record = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("payment {id} disappeared")))?;

        if !record.status.accepts_checkout() {
            return Ok(record.clone());
        }

        record.provider_id = Some(checkout.provider_id);
        record.checkout_url = Some(checkout.checkout_url);
        record.raw_provider_payload = Some(checkout.raw);
        if checkout.method.is_some() {
            record.method = checkout.method;
        }
        record.status = PaymentStatus::Pending;
        record.updated_at = Utc::now();
        let record = record.clone();

        if let Some(registration) = state.registrations.get_mut(&record.registration_id) {
            if matches!(
                registration.payment_status,
                RegistrationPaymentStatus::Unpaid | RegistrationPaymentStatus::Failed
            ) {
                registration.payment_status = RegistrationPaymentStatus::Pending;
            }
        }
        Ok(record)
    }

    async fn payment_by_reference(&self, reference: &Reference) -> Result<Option<PaymentRecord>, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .payments
            .values()
            .find(|p| &p.reference == reference)
            .cloned())
    }

    async fn with_locked_payment<'a>(
        &'a self,
        lookup: &'a PaymentLookup,
        mutation: PaymentMutation<'a>,
    ) -> Result<Option<LockedPayment>, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;

        let Some(id) = state.find(lookup) else {
            return Ok(None);
        };
        let Some(record) = state.payments.get(&id).cloned() else {
            return Ok(None);
        };
        let registration_payment_status = state
            .registrations
            .get(&record.registration_id)
            .map(|r| r.payment_status)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("payment {id} has no registration"))
            })?;

        let original = LockedPayment {
            record,
            registration_payment_status,
        };
        let mut locked = original.clone();
        mutation(&mut locked);

        if locked.record != original.record {
            locked.record.updated_at = Utc::now();
            state.payments.insert(id, locked.record.clone());
        }
        if locked.registration_payment_status != original.registration_payment_status {
            if let Some(registration) = state.registrations.get_mut(&locked.record.registration_id) {
                registration.payment_status = locked.registration_payment_status;
            }
        }

        Ok(Some(locked))
    }
}
