//! Order confirmation endpoint.
//!
//! - GET /orders/:ticket_code/success - Target of every "paid" redirect

use crate::server::state::AppState;
use crate::types::{RegistrationPaymentStatus, TicketCode};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use ticketing_web::AppError;

/// Confirmation shown after payment.
#[derive(Debug, Serialize)]
pub struct OrderSuccessResponse {
    /// Always true; errors use the error envelope
    pub ok: bool,
    /// Ticket identifier
    pub ticket_code: TicketCode,
    /// Attendee name
    pub full_name: String,
    /// Event title
    pub event_title: String,
    /// Registration payment status
    pub payment_status: RegistrationPaymentStatus,
    /// Whether the ticket is valid for entry
    pub paid: bool,
}

/// Show the registration a ticket code belongs to.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/orders/RWB-7KQ2M9XD/success
/// # {"ok":true,"ticket_code":"RWB-7KQ2M9XD","full_name":"Ana","event_title":"Maputo 10K","payment_status":"PAID","paid":true}
/// ```
///
/// # Errors
///
/// 404 for an unknown ticket code.
pub async fn order_success(
    State(state): State<AppState>,
    Path(ticket_code): Path<String>,
) -> Result<Json<OrderSuccessResponse>, AppError> {
    let ticket_code = TicketCode::new(ticket_code);
    let registration = state
        .store
        .registration_by_ticket_code(&ticket_code)
        .await
        .map_err(|e| AppError::internal("Order unavailable").with_source(e))?
        .ok_or_else(|| AppError::not_found("Order", &ticket_code))?;

    Ok(Json(OrderSuccessResponse {
        ok: true,
        paid: registration.payment_status.is_paid(),
        ticket_code: registration.ticket_code,
        full_name: registration.full_name,
        event_title: registration.event_title,
        payment_status: registration.payment_status,
    }))
}
