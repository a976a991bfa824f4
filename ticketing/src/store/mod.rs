//! Payment record storage.
//!
//! [`PaymentStore`] is the repository for payment records and the payment
//! side of registrations. All reconciliation writes go through
//! [`PaymentStore::with_locked_payment`], which holds an exclusive lock on the
//! payment row (and its registration) while a synchronous mutation runs, then
//! persists whatever changed in the same transaction.

use crate::types::{
    InvalidReference, NewPayment, PaymentId, PaymentMethod, PaymentRecord, Reference,
    Registration, RegistrationId, RegistrationPaymentStatus, TicketCode, UnknownVariant,
};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryPaymentStore;
pub use postgres::PostgresPaymentStore;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A uniqueness constraint was violated
    #[error("conflict: {0}")]
    Conflict(String),
    /// A stored row cannot be mapped back to domain types
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// In-memory state lock poisoned
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<InvalidReference> for StoreError {
    fn from(err: InvalidReference) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// How to find the payment an inbound notification refers to.
///
/// The reference is tried first, then the provider ID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentLookup {
    /// Merchant reference
    pub reference: Option<Reference>,
    /// Provider payment ID
    pub provider_id: Option<String>,
}

impl PaymentLookup {
    /// Look up by reference only.
    #[must_use]
    pub const fn by_reference(reference: Reference) -> Self {
        Self {
            reference: Some(reference),
            provider_id: None,
        }
    }

    /// Whether there is nothing to look up by.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.reference.is_none() && self.provider_id.is_none()
    }
}

/// A payment row held under an exclusive lock, with its registration's
/// payment status.
#[derive(Clone, Debug, PartialEq)]
pub struct LockedPayment {
    /// The payment record
    pub record: PaymentRecord,
    /// Payment status of the owning registration
    pub registration_payment_status: RegistrationPaymentStatus,
}

/// Mutation applied to a locked payment.
pub type PaymentMutation<'a> = Box<dyn FnOnce(&mut LockedPayment) + Send + 'a>;

/// Provider data persisted once a checkout exists.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckoutAttachment {
    /// Provider payment ID
    pub provider_id: String,
    /// Hosted checkout page
    pub checkout_url: String,
    /// Provider response
    pub raw: Value,
    /// Channel chosen for this attempt, if any
    pub method: Option<PaymentMethod>,
}

/// Repository for payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Check that the backing storage is reachable.
    ///
    /// # Errors
    ///
    /// Returns error if it is not.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Load a registration.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    async fn registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError>;

    /// Load a registration by its public ticket code.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    async fn registration_by_ticket_code(
        &self,
        ticket_code: &TicketCode,
    ) -> Result<Option<Registration>, StoreError>;

    /// Overwrite a registration's payment status outside reconciliation.
    ///
    /// Only used for free registrations and for repairing a registration
    /// whose payment is already `PAID`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    async fn set_registration_payment_status(
        &self,
        id: RegistrationId,
        status: RegistrationPaymentStatus,
    ) -> Result<(), StoreError>;

    /// Return the registration's payment record, creating a `PENDING` one if
    /// none exists. The flag is `true` when this call created it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the reference belongs to another
    /// registration.
    async fn get_or_create_payment(&self, new: NewPayment) -> Result<(PaymentRecord, bool), StoreError>;

    /// Persist the provider checkout on a payment under its row lock.
    ///
    /// A `PENDING` or `FAILED` payment is (re)opened as `PENDING`, and an
    /// `UNPAID` or `FAILED` registration moves to `PENDING` with it. A payment
    /// that settled or was refunded in the meantime is returned unchanged and
    /// the checkout is discarded.
    ///
    /// # Errors
    ///
    /// Returns error if the payment does not exist or storage fails.
    async fn attach_checkout(
        &self,
        id: PaymentId,
        checkout: CheckoutAttachment,
    ) -> Result<PaymentRecord, StoreError>;

    /// Read a payment by reference, without locking.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    async fn payment_by_reference(&self, reference: &Reference) -> Result<Option<PaymentRecord>, StoreError>;

    /// Lock the payment found by `lookup`, apply `mutation`, and persist any
    /// change to the payment or the registration's payment status atomically.
    ///
    /// Returns the state after the mutation, or `None` if no payment matched
    /// (the mutation is not called).
    ///
    /// # Errors
    ///
    /// Returns error if storage fails; nothing is persisted in that case.
    async fn with_locked_payment<'a>(
        &'a self,
        lookup: &'a PaymentLookup,
        mutation: PaymentMutation<'a>,
    ) -> Result<Option<LockedPayment>, StoreError>;
}
