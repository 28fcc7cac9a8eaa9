//! HMAC-SHA256 primitives shared by the provider verifiers.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Reasons a webhook signature is rejected.
///
/// The display strings are returned verbatim to the caller in the error
/// body, so they stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Provider has no secret configured.
    #[error("Webhook secret not configured")]
    SecretNotConfigured,
    /// Signature header absent or empty.
    #[error("Missing signature header")]
    MissingHeader,
    /// Header present but not in the provider's format.
    #[error("Invalid signature format")]
    InvalidFormat,
    /// Stripe timestamp is not an integer.
    #[error("Invalid timestamp format")]
    InvalidTimestamp,
    /// Stripe timestamp too far from the current time.
    #[error("Timestamp outside tolerance")]
    TimestampOutsideTolerance,
    /// Digest mismatch.
    #[error("Invalid signature")]
    Mismatch,
}

/// Lowercase hex HMAC-SHA256 of `payload` keyed with `secret`.
///
/// # Errors
///
/// Returns `SecretNotConfigured` for an empty secret.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::SecretNotConfigured);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::SecretNotConfigured)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `provided` (bare hex) against the HMAC of `payload`.
///
/// # Errors
///
/// Returns `Mismatch` when the digests differ.
pub fn verify_hex_digest(secret: &str, payload: &[u8], provided: &str) -> Result<(), SignatureError> {
    let expected = hmac_sha256_hex(secret, payload)?;
    if timing_safe_eq(&expected, provided) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Constant-time comparison for equal-length inputs.
///
/// Length is not secret; only content comparison avoids early exit.
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.as_bytes().iter().zip(b.as_bytes()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}
