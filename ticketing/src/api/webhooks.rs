//! Provider webhook endpoint.
//!
//! - POST /payments/webhook/paysuite - Signed payment notifications
//! - GET /payments/webhook/paysuite - Liveness probe used by the provider
//!   dashboard when the callback URL is configured

use crate::server::state::AppState;
use crate::webhook::SIGNATURE_HEADER;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use ticketing_web::{AppError, CorrelationId};

/// Receive a webhook delivery.
///
/// The body is read raw so the signature covers exactly the bytes sent.
///
/// # Errors
///
/// 403 if the signature does not verify (or no secret is configured). Every
/// authenticated delivery is acknowledged with 200, whatever happened to it.
pub async fn paysuite_webhook(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let disposition = state
        .webhooks
        .handle(&body, signature)
        .await
        .map_err(|e| AppError::forbidden("Invalid signature").with_source(e))?;

    tracing::info!(
        correlation_id = %correlation_id.0,
        disposition = disposition.as_str(),
        "Webhook acknowledged"
    );
    Ok((StatusCode::OK, "ok"))
}

/// Answer the provider's reachability check.
#[allow(clippy::unused_async)]
pub async fn webhook_liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
