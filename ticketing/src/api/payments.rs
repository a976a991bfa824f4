//! Payer-facing payment endpoints.
//!
//! - GET /payments/start - Start or resume payment, redirect to checkout
//! - GET /payments/return - Landing page after checkout (pull reconciliation)
//! - GET /payments/status - Status polling for the "verifying" page
//!
//! # Payment Flow
//!
//! 1. **Start**: the registration page links to `/payments/start`
//! 2. **Checkout**: the payer is redirected to the provider's hosted page
//! 3. **Return**: the provider sends the payer to `/payments/return`
//! 4. **Verify**: if the outcome is not known yet, the frontend polls
//!    `/payments/status` until the webhook lands

use crate::initiation::{InitiationError, InitiationOutcome};
use crate::provider::ProviderError;
use crate::return_flow::{ReturnFlowError, ReturnOutcome};
use crate::server::state::AppState;
use crate::status::{self, PaymentStatusView, StatusError};
use crate::types::{Reference, RegistrationId, TicketCode};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use ticketing_web::{AppError, CorrelationId};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query for `/payments/start`.
#[derive(Debug, Deserialize)]
pub struct StartPaymentParams {
    /// Registration to pay for
    pub registration_id: Option<String>,
    /// Preferred channel (`mpesa`, `emola`, `card`)
    pub method: Option<String>,
}

/// Query for `/payments/return`.
#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    /// Merchant reference appended by the provider
    pub reference: Option<String>,
}

/// Query for `/payments/status`.
#[derive(Debug, Deserialize)]
pub struct StatusParams {
    /// Merchant reference
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

/// Body of `/payments/return` while the outcome is not final.
#[derive(Debug, Serialize)]
pub struct ReturnResponse {
    /// Always true; errors use the error envelope
    pub ok: bool,
    /// `verifying` or `failed`
    pub state: &'static str,
    /// Reference to poll with
    pub reference: Option<Reference>,
    /// Polling endpoint for this payment
    pub status_url: Option<String>,
}

/// Body of `/payments/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Always true; errors use the error envelope
    pub ok: bool,
    /// Payment and registration status
    #[serde(flatten)]
    pub status: PaymentStatusView,
}

/// Page shown once a registration is settled.
#[must_use]
pub fn success_path(ticket_code: &TicketCode) -> String {
    format!("/orders/{ticket_code}/success")
}

// ============================================================================
// Error mapping
// ============================================================================

impl From<InitiationError> for AppError {
    fn from(err: InitiationError) -> Self {
        match err {
            InitiationError::NotFound(id) => Self::not_found("Registration", id),
            InitiationError::InvalidMethod(e) => Self::validation(format!(
                "Unsupported payment method {:?}; use mpesa, emola or card",
                e.value
            )),
            InitiationError::Refunded(reference) => Self::new(
                StatusCode::CONFLICT,
                format!("Payment {reference} was refunded"),
                "PAYMENT_REFUNDED".to_string(),
            ),
            InitiationError::Provider(ProviderError::Configuration(e)) => {
                Self::unavailable("Online payments are not available right now").with_source(e)
            }
            e @ (InitiationError::Provider(_) | InitiationError::ProviderResponseInvalid(_)) => {
                Self::bad_gateway("Could not reach the payment provider, please try again")
                    .with_source(e)
            }
            InitiationError::Store(e) => Self::internal("Payment could not be started").with_source(e),
        }
    }
}

impl From<ReturnFlowError> for AppError {
    fn from(err: ReturnFlowError) -> Self {
        match err {
            ReturnFlowError::NotFound(reference) => Self::not_found("Payment", reference),
            ReturnFlowError::Store(e) => {
                Self::internal("Payment could not be verified").with_source(e)
            }
        }
    }
}

impl From<StatusError> for AppError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::MissingReference => Self::bad_request("Missing ref parameter"),
            StatusError::NotFound(reference) => Self::not_found("Payment", reference),
            StatusError::Store(e) => Self::internal("Payment status unavailable").with_source(e),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Start payment for a registration.
///
/// Redirects to the provider checkout, or straight to the success page when
/// nothing is due.
///
/// # Example
///
/// ```bash
/// curl -i "http://localhost:8080/payments/start?registration_id=550e8400-e29b-41d4-a716-446655440000&method=mpesa"
/// # HTTP/1.1 303 See Other
/// # location: https://paysuite.tech/checkout/...
/// ```
///
/// # Errors
///
/// 400 for a missing or malformed registration id, 404 for an unknown one,
/// 422 for an unsupported method, 502/503 when the provider is unavailable.
pub async fn start_payment(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Query(params): Query<StartPaymentParams>,
) -> Result<Redirect, AppError> {
    let raw_id = params
        .registration_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing registration_id parameter"))?;
    let registration_id = Uuid::parse_str(raw_id)
        .map(RegistrationId::from_uuid)
        .map_err(|_| AppError::bad_request("registration_id must be a UUID"))?;

    tracing::info!(
        correlation_id = %correlation_id.0,
        %registration_id,
        method = ?params.method,
        "Payment start requested"
    );

    let outcome = state
        .initiator
        .initiate(registration_id, params.method.as_deref())
        .await?;

    Ok(match outcome {
        InitiationOutcome::Checkout { checkout_url, .. } => Redirect::to(&checkout_url),
        InitiationOutcome::AlreadyPaid { ticket_code } | InitiationOutcome::Free { ticket_code } => {
            Redirect::to(&success_path(&ticket_code))
        }
    })
}

/// Landing page after the hosted checkout.
///
/// A paid registration redirects to its success page; otherwise the payer
/// gets a JSON body telling the frontend to keep polling (or that the attempt
/// failed).
///
/// # Errors
///
/// 404 for an unknown reference, 500 if storage fails.
pub async fn payment_return(
    State(state): State<AppState>,
    Query(params): Query<ReturnParams>,
) -> Result<Response, AppError> {
    let outcome = state.return_flow.handle(params.reference.as_deref()).await?;

    let (label, reference) = match outcome {
        ReturnOutcome::Paid { ticket_code } => {
            return Ok(Redirect::to(&success_path(&ticket_code)).into_response());
        }
        ReturnOutcome::Verifying { reference } => ("verifying", reference),
        ReturnOutcome::Failed { reference } => ("failed", Some(reference)),
    };

    let status_url = reference
        .as_ref()
        .map(|r| format!("/payments/status?ref={r}"));
    Ok(Json(ReturnResponse {
        ok: true,
        state: label,
        reference,
        status_url,
    })
    .into_response())
}

/// Current payment status, for polling.
///
/// # Example
///
/// ```bash
/// curl "http://localhost:8080/payments/status?ref=RWB7KQ2M9XD"
/// # {"ok":true,"payment_status":"PENDING","registration_payment_status":"PENDING","ticket_code":"RWB-7KQ2M9XD"}
/// ```
///
/// # Errors
///
/// 400 without `ref`, 404 for an unknown reference.
pub async fn payment_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>, AppError> {
    let view = status::payment_status(state.store.as_ref(), params.reference.as_deref()).await?;
    Ok(Json(StatusResponse { ok: true, status: view }))
}
