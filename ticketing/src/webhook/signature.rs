//! Webhook signature verification using HMAC-SHA256.
//!
//! The provider signs the raw request body with the shared webhook secret and
//! sends the hex digest in the `X-Webhook-Signature` header. A `sha256=`
//! prefix is tolerated. Verification happens before the body is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Why a delivery was not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No webhook secret configured; every delivery is rejected
    #[error("webhook secret is not configured")]
    SecretNotConfigured,
    /// Header absent or empty
    #[error("missing X-Webhook-Signature header")]
    MissingSignature,
    /// Header is not hex
    #[error("signature is not valid hex")]
    Malformed,
    /// Digest does not match the body
    #[error("signature mismatch")]
    Mismatch,
}

fn decode(header: &str) -> Option<Vec<u8>> {
    let header = header.trim();
    let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
    hex::decode(hex_sig).ok()
}

/// Hex HMAC-SHA256 of `payload` under `secret`, as the provider computes it.
///
/// Returns `None` only if the key is rejected, which HMAC never does.
#[must_use]
pub fn sign_payload(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check `signature` (the header value) against `payload`.
///
/// The comparison is constant-time.
///
/// # Errors
///
/// See [`SignatureError`].
pub fn verify_signature(
    payload: &[u8],
    signature: Option<&str>,
    secret: Option<&str>,
) -> Result<(), SignatureError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::SecretNotConfigured)?;
    let signature = signature
        .filter(|s| !s.trim().is_empty())
        .ok_or(SignatureError::MissingSignature)?;
    let expected = decode(signature).ok_or(SignatureError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}
