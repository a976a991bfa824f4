//! Router configuration for the payment service.

use super::health::readiness_check;
use super::state::AppState;
use crate::api::{orders, payments, webhooks};
use axum::{routing::get, Router};
use ticketing_web::correlation_id_layer;
use ticketing_web::handlers::health_check;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Configures:
/// - Health checks (`/health`, `/ready`)
/// - Payer endpoints under `/payments`
/// - The order confirmation page
/// - The provider webhook
///
/// Every request runs inside the correlation-id span, with `TraceLayer`
/// logging inside it.
pub fn build_router(state: AppState) -> Router {
    let payment_routes = Router::new()
        .route("/start", get(payments::start_payment))
        .route("/return", get(payments::payment_return))
        .route("/status", get(payments::payment_status))
        .route(
            "/webhook/paysuite",
            get(webhooks::webhook_liveness).post(webhooks::paysuite_webhook),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/orders/:ticket_code/success", get(orders::order_success))
        .nest("/payments", payment_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
