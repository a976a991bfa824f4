//! Provider webhook ingress (push).

pub mod ingress;
pub mod signature;

pub use ingress::{delivery_keys, DeliveryKeys, WebhookDisposition, WebhookIngress};
pub use signature::{sign_payload, verify_signature, SignatureError, SIGNATURE_HEADER};
