//! Read-only payment status for frontend polling.

use crate::store::{PaymentStore, StoreError};
use crate::types::{PaymentStatus, Reference, RegistrationPaymentStatus, TicketCode};
use serde::Serialize;
use thiserror::Error;

/// Status query errors
#[derive(Debug, Error)]
pub enum StatusError {
    /// No reference given
    #[error("missing payment reference")]
    MissingReference,
    /// No payment has this reference
    #[error("payment {0} not found")]
    NotFound(String),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Current status of a payment and its registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentStatusView {
    /// Record status
    pub payment_status: PaymentStatus,
    /// Registration payment status
    pub registration_payment_status: RegistrationPaymentStatus,
    /// Ticket of the registration
    pub ticket_code: TicketCode,
}

/// Look up the status of the payment with `reference`. Never writes.
///
/// # Errors
///
/// Returns [`StatusError::MissingReference`] for a blank reference,
/// [`StatusError::NotFound`] if nothing matches.
pub async fn payment_status(
    store: &dyn PaymentStore,
    reference: Option<&str>,
) -> Result<PaymentStatusView, StatusError> {
    let raw = reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or(StatusError::MissingReference)?;
    let reference = Reference::parse(raw).map_err(|_| StatusError::NotFound(raw.to_string()))?;

    let record = store
        .payment_by_reference(&reference)
        .await?
        .ok_or_else(|| StatusError::NotFound(raw.to_string()))?;
    let registration = store
        .registration(record.registration_id)
        .await?
        .ok_or_else(|| StoreError::Corrupt(format!("payment {} has no registration", record.id)))?;

    Ok(PaymentStatusView {
        payment_status: record.status,
        registration_payment_status: registration.payment_status,
        ticket_code: registration.ticket_code,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryPaymentStore;
    use crate::types::{Money, NewPayment, Registration, RegistrationId, RegistrationStatus};

    #[tokio::test]
    async fn test_reports_both_statuses() {
        let store = InMemoryPaymentStore::new();
        let registration = Registration {
            id: RegistrationId::new(),
            ticket_code: TicketCode::new("RWB-STATUS22"),
            full_name: "Paulo Nhantumbo".to_string(),
            email: "paulo@example.com".to_string(),
            event_title: "Xai-Xai Trail".to_string(),
            event_price: Some(Money::from_major(250)),
            status: RegistrationStatus::Active,
            payment_status: RegistrationPaymentStatus::Pending,
        };
        store.insert_registration(registration.clone()).unwrap();
        store
            .get_or_create_payment(NewPayment {
                registration_id: registration.id,
                reference: Reference::parse("RWBSTATUS22").unwrap(),
                amount: Money::from_major(250),
                currency: "MZN".to_string(),
                method: None,
            })
            .await
            .unwrap();

        let view = payment_status(&store, Some("RWBSTATUS22")).await.unwrap();

        assert_eq!(view.payment_status, PaymentStatus::Pending);
        assert_eq!(view.registration_payment_status, RegistrationPaymentStatus::Pending);
        assert_eq!(view.ticket_code, registration.ticket_code);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_references() {
        let store = InMemoryPaymentStore::new();

        assert!(matches!(
            payment_status(&store, None).await,
            Err(StatusError::MissingReference)
        ));
        assert!(matches!(
            payment_status(&store, Some("  ")).await,
            Err(StatusError::MissingReference)
        ));
        assert!(matches!(
            payment_status(&store, Some("RWBNOPE")).await,
            Err(StatusError::NotFound(_))
        ));
    }
}
