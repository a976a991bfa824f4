//! Reconciliation integration tests.
//!
//! Drive initiation, webhook ingress and the return flow together against the
//! in-memory store and the mock provider, including concurrent deliveries on a
//! multi-threaded runtime.
//!
//! Run with: `cargo test --test reconciliation_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use ticketing::initiation::{InitiationOutcome, InitiationSettings};
use ticketing::provider::{MockPaymentProvider, ProviderError};
use ticketing::reconcile::{
    PaymentAction, PaymentEnvironment, PaymentEvent, ReconcileSource, Reconciler,
};
use ticketing::return_flow::ReturnOutcome;
use ticketing::server::AppState;
use ticketing::store::{InMemoryPaymentStore, PaymentLookup, PaymentStore};
use ticketing::types::{
    Money, PaymentMethod, PaymentStatus, Reference, Registration, RegistrationId,
    RegistrationPaymentStatus, RegistrationStatus, TicketCode,
};
use ticketing::webhook::{sign_payload, SignatureError, WebhookDisposition};
use ticketing_testing::test_clock;

const SECRET: &str = "whsec_integration";

struct Harness {
    store: InMemoryPaymentStore,
    provider: MockPaymentProvider,
    app: AppState,
}

fn harness_with(provider: MockPaymentProvider) -> Harness {
    let store = InMemoryPaymentStore::new();
    let app = AppState::new(
        Arc::new(store.clone()),
        Arc::new(provider.clone()),
        Arc::new(test_clock()),
        InitiationSettings {
            return_url: "http://localhost:8080/payments/return".to_string(),
            callback_url: "http://localhost:8080/payments/webhook/paysuite".to_string(),
            currency: "MZN".to_string(),
            description_prefix: "Run With Broto".to_string(),
        },
        Some(SECRET.to_string()),
    );
    Harness {
        store,
        provider,
        app,
    }
}

fn harness() -> Harness {
    harness_with(MockPaymentProvider::new())
}

fn register(h: &Harness, price: Option<Money>) -> Registration {
    let registration = Registration {
        id: RegistrationId::new(),
        ticket_code: TicketCode::generate(&mut rand::thread_rng()),
        full_name: "Ana Macuácua".to_string(),
        email: "ana@example.com".to_string(),
        event_title: "Maputo 10K".to_string(),
        event_price: price,
        status: RegistrationStatus::Active,
        payment_status: RegistrationPaymentStatus::Unpaid,
    };
    h.store.insert_registration(registration.clone()).unwrap();
    registration
}

async fn checkout(h: &Harness, registration: &Registration) -> Reference {
    match h.app.initiator.initiate(registration.id, None).await.unwrap() {
        InitiationOutcome::Checkout { reference, .. } => reference,
        other => panic!("expected checkout, got {other:?}"),
    }
}

fn signed(payload: &Value) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = sign_payload(&body, SECRET).unwrap();
    (body, signature)
}

fn success_webhook(reference: &Reference, request_id: &str) -> Value {
    json!({
        "event": "payment.success",
        "request_id": request_id,
        "data": {
            "reference": reference.as_str(),
            "id": MockPaymentProvider::provider_id_for(reference.as_str()),
            "transaction": {
                "status": "completed",
                "id": "TX-778899",
                "method": "emola",
                "paid_at": "2025-03-01T10:00:00Z"
            }
        }
    })
}

async fn payment(h: &Harness, reference: &Reference) -> ticketing::PaymentRecord {
    h.store.payment_by_reference(reference).await.unwrap().unwrap()
}

async fn registration_status(h: &Harness, registration: &Registration) -> RegistrationPaymentStatus {
    h.store
        .registration(registration.id)
        .await
        .unwrap()
        .unwrap()
        .payment_status
}

/// Test: the full happy path.
///
/// 500 MZN registration → checkout → `payment.success` webhook → PAID.
#[tokio::test]
async fn test_happy_path_initiate_then_webhook() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));

    let reference = checkout(&h, &registration).await;
    let pending = payment(&h, &reference).await;
    assert_eq!(pending.status, PaymentStatus::Pending);
    assert_eq!(pending.amount, Money::from_major(500));
    assert!(pending.checkout_url.is_some());
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Pending);

    let (body, signature) = signed(&success_webhook(&reference, "req_1"));
    let disposition = h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();

    assert_eq!(disposition, WebhookDisposition::Processed { outcome: "paid" });
    let paid = payment(&h, &reference).await;
    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(paid.transaction_id.as_deref(), Some("TX-778899"));
    assert_eq!(paid.method, Some(PaymentMethod::Emola));
    assert_eq!(
        paid.paid_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap())
    );
    assert_eq!(paid.last_webhook_request_id.as_deref(), Some("req_1"));
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Paid);

    // Starting again is a no-op
    let again = h.app.initiator.initiate(registration.id, None).await.unwrap();
    assert!(matches!(again, InitiationOutcome::AlreadyPaid { .. }));
    assert_eq!(h.provider.create_calls().len(), 1);
}

/// Test: the same delivery twice changes nothing the second time.
#[tokio::test]
async fn test_duplicate_delivery_is_ignored() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;

    let (body, signature) = signed(&json!({
        "event": "payment.failed",
        "request_id": "req_dup",
        "data": { "reference": reference.as_str() }
    }));
    let first = h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();
    let after_first = payment(&h, &reference).await;

    let second = h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();
    let after_second = payment(&h, &reference).await;

    assert_eq!(first, WebhookDisposition::Processed { outcome: "failed" });
    assert_eq!(second, WebhookDisposition::Duplicate);
    assert_eq!(after_first, after_second);
}

/// Test: a bad signature never reaches the payment.
#[tokio::test]
async fn test_bad_signature_leaves_record_untouched() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;
    let before = payment(&h, &reference).await;

    let body = serde_json::to_vec(&success_webhook(&reference, "req_forged")).unwrap();
    let forged = sign_payload(&body, "not-the-secret").unwrap();

    assert_eq!(
        h.app.webhooks.handle(&body, Some(&forged)).await,
        Err(SignatureError::Mismatch)
    );
    assert_eq!(
        h.app.webhooks.handle(&body, None).await,
        Err(SignatureError::MissingSignature)
    );
    assert_eq!(payment(&h, &reference).await, before);
}

/// Test: authenticated deliveries without anything actionable are acknowledged.
#[tokio::test]
async fn test_unactionable_deliveries_are_acknowledged() {
    let h = harness();

    let garbage = b"not json at all";
    let signature = sign_payload(garbage, SECRET).unwrap();
    assert_eq!(
        h.app.webhooks.handle(garbage, Some(&signature)).await.unwrap(),
        WebhookDisposition::Ignored {
            reason: "malformed_json"
        }
    );

    let (body, signature) = signed(&json!({"event": "payment.success", "data": {}}));
    assert_eq!(
        h.app.webhooks.handle(&body, Some(&signature)).await.unwrap(),
        WebhookDisposition::Ignored {
            reason: "no_identifiers"
        }
    );

    let (body, signature) = signed(&json!({
        "event": "payment.success",
        "data": {"reference": "RWBUNKNOWN1"}
    }));
    assert_eq!(
        h.app.webhooks.handle(&body, Some(&signature)).await.unwrap(),
        WebhookDisposition::UnknownPayment
    );
}

/// Test: a webhook that only carries the provider ID still finds the payment.
#[tokio::test]
async fn test_provider_id_fallback() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;

    let (body, signature) = signed(&json!({
        "event": "payment.success",
        "request_id": "req_by_id",
        "data": { "id": MockPaymentProvider::provider_id_for(reference.as_str()) }
    }));
    h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();

    assert_eq!(payment(&h, &reference).await.status, PaymentStatus::Paid);
}

/// Test: amount due of zero settles without the provider.
#[tokio::test]
async fn test_zero_amount_needs_no_provider() {
    let h = harness();
    let registration = register(&h, Some(Money::ZERO));

    let outcome = h.app.initiator.initiate(registration.id, Some("card")).await.unwrap();

    assert!(matches!(outcome, InitiationOutcome::Free { .. }));
    assert!(h.provider.create_calls().is_empty());
    assert_eq!(h.store.payment_count().unwrap(), 0);
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Paid);
}

/// Test: provider timeout during the return flow.
///
/// The payer sees "verifying", nothing changes, and no error surfaces.
#[tokio::test]
async fn test_return_flow_timeout_is_verifying() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;
    h.provider.set_remote_state(
        &MockPaymentProvider::provider_id_for(reference.as_str()),
        Err(ProviderError::Timeout),
    );
    let before = payment(&h, &reference).await;

    let outcome = h.app.return_flow.handle(Some(reference.as_str())).await.unwrap();

    assert_eq!(
        outcome,
        ReturnOutcome::Verifying {
            reference: Some(reference.clone())
        }
    );
    assert_eq!(payment(&h, &reference).await, before);
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Pending);
}

/// Test: a failed attempt can be started again and then paid.
#[tokio::test]
async fn test_failed_attempt_can_be_retried() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;

    let (body, signature) = signed(&json!({
        "event": "payment.failed",
        "request_id": "req_fail",
        "data": { "reference": reference.as_str() }
    }));
    h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Failed);

    let retried = checkout(&h, &registration).await;
    assert_eq!(retried, reference);
    assert_eq!(h.store.payment_count().unwrap(), 1);
    assert_eq!(payment(&h, &reference).await.status, PaymentStatus::Pending);
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Pending);

    // The payer comes back before paying the new checkout
    h.provider.set_remote_state(
        &MockPaymentProvider::provider_id_for(reference.as_str()),
        Ok(json!({"id": "remote", "transaction": {"status": "pending"}})),
    );
    let returned = h.app.return_flow.handle(Some(reference.as_str())).await.unwrap();
    assert_eq!(
        returned,
        ReturnOutcome::Verifying {
            reference: Some(reference.clone())
        }
    );

    let (body, signature) = signed(&success_webhook(&reference, "req_ok"));
    h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();
    assert_eq!(payment(&h, &reference).await.status, PaymentStatus::Paid);
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Paid);
}

/// Test: a webhook settles the payment while checkout creation is in flight.
///
/// Verifies that:
/// - The payer is not sent to a second checkout
/// - The settlement payload is not overwritten by the creation response
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_webhook_during_checkout_creation_wins() {
    let h = harness_with(MockPaymentProvider::new().with_latency(Duration::from_millis(200)));
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = Reference::from_ticket_code(&registration.ticket_code);
    let webhook = success_webhook(&reference, "req_early");

    let initiator = h.app.initiator.clone();
    let id = registration.id;
    let initiation = tokio::spawn(async move { initiator.initiate(id, None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (body, signature) = signed(&webhook);
    let disposition = h.app.webhooks.handle(&body, Some(&signature)).await.unwrap();
    assert_eq!(disposition, WebhookDisposition::Processed { outcome: "paid" });

    let outcome = initiation.await.unwrap().unwrap();

    assert_eq!(
        outcome,
        InitiationOutcome::AlreadyPaid {
            ticket_code: registration.ticket_code.clone()
        }
    );
    let record = payment(&h, &reference).await;
    assert_eq!(record.status, PaymentStatus::Paid);
    assert_eq!(record.raw_provider_payload, Some(webhook));
    assert_eq!(record.checkout_url, None);
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Paid);
}

/// Test: two concurrent initiations create exactly one record.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initiations_create_one_record() {
    let h = harness_with(MockPaymentProvider::new().with_latency(Duration::from_millis(20)));
    let registration = register(&h, Some(Money::from_major(500)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let initiator = h.app.initiator.clone();
        let id = registration.id;
        handles.push(tokio::spawn(async move { initiator.initiate(id, None).await }));
    }

    let mut references = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            InitiationOutcome::Checkout { reference, .. } => references.push(reference),
            other => panic!("expected checkout, got {other:?}"),
        }
    }

    assert_eq!(h.store.payment_count().unwrap(), 1);
    references.dedup();
    assert_eq!(references.len(), 1);
}

/// Test: many concurrent outcomes for one payment.
///
/// Verifies that:
/// - The payment ends PAID because at least one PAID was applied
/// - `MarkedPaid` happens exactly once across all applications
/// - Late failures never pull it back
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_outcomes_settle_exactly_once() {
    let h = harness();
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;
    let reconciler = Reconciler::new(
        Arc::new(h.store.clone()),
        PaymentEnvironment::new(Arc::new(test_clock())),
    );

    let mut handles = Vec::new();
    for i in 0..40 {
        let reconciler = reconciler.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            let (action, source) = match i % 4 {
                0 => (
                    PaymentAction::ApplyRemoteState {
                        payload: json!({"transaction": {"status": "completed"}}),
                    },
                    ReconcileSource::ReturnFlow,
                ),
                1 => (
                    PaymentAction::ReceiveWebhook {
                        request_id: Some(format!("req_{i}")),
                        payload: json!({
                            "event": "payment.success",
                            "data": {"reference": reference.as_str()}
                        }),
                    },
                    ReconcileSource::Webhook,
                ),
                2 => (
                    PaymentAction::ReceiveWebhook {
                        request_id: Some(format!("req_{i}")),
                        payload: json!({
                            "event": "payment.failed",
                            "data": {"reference": reference.as_str()}
                        }),
                    },
                    ReconcileSource::Webhook,
                ),
                _ => (
                    PaymentAction::ApplyRemoteState {
                        payload: json!({"status": "pending"}),
                    },
                    ReconcileSource::ReturnFlow,
                ),
            };
            reconciler
                .reconcile(&PaymentLookup::by_reference(reference), action, source)
                .await
        }));
    }

    let mut marked_paid = 0;
    for handle in handles {
        let reconciliation = handle.await.unwrap().unwrap().expect("payment exists");
        marked_paid += reconciliation
            .events
            .iter()
            .filter(|e| matches!(e, PaymentEvent::MarkedPaid { .. }))
            .count();
    }

    assert_eq!(marked_paid, 1);
    assert_eq!(payment(&h, &reference).await.status, PaymentStatus::Paid);
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Paid);
}

/// Test: webhook and return flow race with the same PAID outcome.
///
/// Both succeed and the payment is settled once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_webhook_and_return_flow_race() {
    let h = harness_with(MockPaymentProvider::new().with_latency(Duration::from_millis(5)));
    let registration = register(&h, Some(Money::from_major(500)));
    let reference = checkout(&h, &registration).await;
    h.provider.set_remote_state(
        &MockPaymentProvider::provider_id_for(reference.as_str()),
        Ok(json!({"id": "remote", "transaction": {"status": "completed", "id": "TX-778899"}})),
    );
    let (body, signature) = signed(&success_webhook(&reference, "req_race"));

    let (pushed, pulled) = tokio::join!(
        h.app.webhooks.handle(&body, Some(&signature)),
        h.app.return_flow.handle(Some(reference.as_str())),
    );

    let pushed = pushed.unwrap();
    assert!(matches!(
        pushed,
        WebhookDisposition::Processed {
            outcome: "paid" | "unchanged"
        }
    ));
    assert!(matches!(pulled.unwrap(), ReturnOutcome::Paid { .. }));

    let record = payment(&h, &reference).await;
    assert_eq!(record.status, PaymentStatus::Paid);
    assert_eq!(record.transaction_id.as_deref(), Some("TX-778899"));
    assert!(record.paid_at.is_some());
    assert_eq!(registration_status(&h, &registration).await, RegistrationPaymentStatus::Paid);
}
