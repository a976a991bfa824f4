//! Payment initiation.
//!
//! Turns "registration X wants to pay" into a hosted checkout:
//!
//! ```text
//! registration PAID ───────────────────────────────► AlreadyPaid
//! method not recognized ───────────────────────────► InvalidMethod
//! amount due is zero ──► registration PAID ────────► Free
//! get-or-create record ─┬─ record PAID ─► repair ──► AlreadyPaid
//!                       └─ create checkout ─► attach ─┬─ still open ─► Checkout
//!                                                     └─ PAID by now ─► AlreadyPaid
//! ```
//!
//! The provider call runs without any lock held, so the attach re-checks the
//! record under its row lock. A failed call leaves the record as it was so the
//! payer can simply try again; a successful attach reopens a `FAILED` attempt
//! as `PENDING`.

use crate::config::Config;
use crate::metrics;
use crate::provider::{PaymentProvider, PaymentRequest, ProviderError};
use crate::store::{CheckoutAttachment, PaymentStore, StoreError};
use crate::types::{
    NewPayment, PaymentMethod, PaymentRecord, PaymentStatus, Reference, Registration, RegistrationId,
    RegistrationPaymentStatus, TicketCode, UnknownVariant,
};
use std::sync::Arc;
use thiserror::Error;

/// Initiation errors
#[derive(Debug, Error)]
pub enum InitiationError {
    /// No such registration
    #[error("registration {0} not found")]
    NotFound(RegistrationId),
    /// The requested channel is not offered
    #[error(transparent)]
    InvalidMethod(#[from] UnknownVariant),
    /// The payment was refunded and cannot be collected again
    #[error("payment {0} was refunded")]
    Refunded(Reference),
    /// The provider accepted the request but gave no checkout page
    #[error("payment provider returned no checkout URL for {0}")]
    ProviderResponseInvalid(Reference),
    /// Provider call failed; the record stays `PENDING`
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where the payer goes next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitiationOutcome {
    /// Nothing to pay, it is already settled
    AlreadyPaid {
        /// Ticket to show
        ticket_code: TicketCode,
    },
    /// Nothing to pay, the registration is free
    Free {
        /// Ticket to show
        ticket_code: TicketCode,
    },
    /// Send the payer to the provider
    Checkout {
        /// Hosted checkout page
        checkout_url: String,
        /// Merchant reference of the attempt
        reference: Reference,
    },
}

impl InitiationOutcome {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyPaid { .. } => "already_paid",
            Self::Free { .. } => "free",
            Self::Checkout { .. } => "checkout",
        }
    }
}

/// Values copied into every provider request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitiationSettings {
    /// Where the provider sends the payer back
    pub return_url: String,
    /// Where the provider posts webhooks
    pub callback_url: String,
    /// Currency for new records
    pub currency: String,
    /// First half of the checkout description
    pub description_prefix: String,
}

impl InitiationSettings {
    /// Derive the settings from the service configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            return_url: config.return_url(),
            callback_url: config.callback_url(),
            currency: config.payments.currency.clone(),
            description_prefix: config.payments.description_prefix.clone(),
        }
    }

    fn description(&self, registration: &Registration) -> String {
        format!("{} • {}", self.description_prefix, registration.event_title)
    }

    /// Return URL for one attempt, carrying its reference so the return flow
    /// can find the payment without relying on the provider to append it.
    #[must_use]
    pub fn return_url_for(&self, reference: &Reference) -> String {
        let separator = if self.return_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}reference={reference}", self.return_url)
    }
}

/// Starts payments for registrations.
#[derive(Clone)]
pub struct PaymentInitiator {
    store: Arc<dyn PaymentStore>,
    provider: Arc<dyn PaymentProvider>,
    settings: InitiationSettings,
}

impl PaymentInitiator {
    /// Creates a new `PaymentInitiator`
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        provider: Arc<dyn PaymentProvider>,
        settings: InitiationSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Start (or resume) payment for a registration.
    ///
    /// `method` is the payer's preferred channel; blank means "let the payer
    /// choose on the checkout page".
    ///
    /// # Errors
    ///
    /// See [`InitiationError`]. Calling again after any error is safe.
    pub async fn initiate(
        &self,
        registration_id: RegistrationId,
        method: Option<&str>,
    ) -> Result<InitiationOutcome, InitiationError> {
        let result = self.run(registration_id, method).await;
        match &result {
            Ok(outcome) => metrics::record_initiation(outcome.as_str()),
            Err(e) => {
                metrics::record_initiation("error");
                tracing::warn!(%registration_id, error = %e, "Payment initiation failed");
            }
        }
        result
    }

    async fn run(
        &self,
        registration_id: RegistrationId,
        method: Option<&str>,
    ) -> Result<InitiationOutcome, InitiationError> {
        let registration = self
            .store
            .registration(registration_id)
            .await?
            .ok_or(InitiationError::NotFound(registration_id))?;

        if registration.payment_status.is_paid() {
            tracing::info!(%registration_id, "Registration already paid");
            return Ok(InitiationOutcome::AlreadyPaid {
                ticket_code: registration.ticket_code,
            });
        }

        let method = parse_method(method)?;

        let amount = registration.amount_due();
        if amount.is_zero() {
            self.store
                .set_registration_payment_status(registration_id, RegistrationPaymentStatus::Paid)
                .await?;
            tracing::info!(%registration_id, "Nothing due, registration marked paid");
            return Ok(InitiationOutcome::Free {
                ticket_code: registration.ticket_code,
            });
        }

        let (record, created) = self
            .store
            .get_or_create_payment(NewPayment {
                registration_id,
                reference: Reference::from_ticket_code(&registration.ticket_code),
                amount,
                currency: self.settings.currency.clone(),
                method,
            })
            .await?;

        if let Some(settled) = self.settled(&registration, &record).await? {
            return Ok(settled);
        }

        tracing::info!(
            %registration_id,
            reference = %record.reference,
            amount = %record.amount,
            created,
            "Creating provider checkout"
        );

        let created_payment = self
            .provider
            .create_payment_request(PaymentRequest {
                amount: record.amount,
                reference: record.reference.clone(),
                description: self.settings.description(&registration),
                return_url: self.settings.return_url_for(&record.reference),
                callback_url: self.settings.callback_url.clone(),
                method: method.or(record.method),
            })
            .await?;

        let Some(checkout_url) = created_payment
            .checkout_url
            .filter(|url| !url.trim().is_empty())
        else {
            return Err(InitiationError::ProviderResponseInvalid(record.reference));
        };

        let attached = self
            .store
            .attach_checkout(
                record.id,
                CheckoutAttachment {
                    provider_id: created_payment.provider_id,
                    checkout_url: checkout_url.clone(),
                    raw: created_payment.raw,
                    method,
                },
            )
            .await?;

        // Settled while the provider call was in flight
        if let Some(settled) = self.settled(&registration, &attached).await? {
            tracing::info!(
                reference = %attached.reference,
                status = %attached.status,
                "Payment settled during checkout creation, checkout discarded"
            );
            return Ok(settled);
        }

        tracing::info!(
            reference = %attached.reference,
            provider_id = ?attached.provider_id,
            "Checkout ready"
        );

        Ok(InitiationOutcome::Checkout {
            checkout_url,
            reference: attached.reference,
        })
    }

    /// Outcome for a record that can no longer be paid, repairing the
    /// registration of a paid record. `None` while the record is open.
    async fn settled(
        &self,
        registration: &Registration,
        record: &PaymentRecord,
    ) -> Result<Option<InitiationOutcome>, InitiationError> {
        match record.status {
            PaymentStatus::Paid => {
                if !registration.payment_status.is_paid() {
                    self.store
                        .set_registration_payment_status(
                            registration.id,
                            RegistrationPaymentStatus::Paid,
                        )
                        .await?;
                    tracing::info!(
                        registration_id = %registration.id,
                        reference = %record.reference,
                        "Repaired registration of a paid payment"
                    );
                }
                Ok(Some(InitiationOutcome::AlreadyPaid {
                    ticket_code: registration.ticket_code.clone(),
                }))
            }
            PaymentStatus::Refunded => Err(InitiationError::Refunded(record.reference.clone())),
            PaymentStatus::Pending | PaymentStatus::Failed => Ok(None),
        }
    }
}

fn parse_method(method: Option<&str>) -> Result<Option<PaymentMethod>, UnknownVariant> {
    match method.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}
