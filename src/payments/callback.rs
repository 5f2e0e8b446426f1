//! Webhook authenticity checks shared by every rail.
//!
//! Signatures are HMAC-SHA256 over the exact raw request body, sent either as
//! a bare hex digest or as `sha256=<hex>`. When no secret is configured the
//! check passes: sandbox deployments rely on this, production deployments
//! must configure a secret.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::ProviderName;
use crate::payments::utils::{hmac_sha256_hex, secure_eq};
use tracing::{debug, warn};

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signature to place in a header for `payload`, in `sha256=<hex>` form.
pub fn sign(payload: &[u8], secret: &str) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hmac_sha256_hex(payload, secret))
}

/// `true` when `signature` authenticates `payload` under `secret`, or when no
/// secret is configured.
pub fn verify(payload: &[u8], signature: Option<&str>, secret: Option<&str>) -> bool {
    let secret = match secret.map(str::trim).filter(|s| !s.is_empty()) {
        Some(secret) => secret,
        None => return true,
    };
    let provided = match signature.map(str::trim).filter(|s| !s.is_empty()) {
        Some(signature) => signature,
        None => return false,
    };
    let provided = provided
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(provided)
        .to_ascii_lowercase();
    let expected = hmac_sha256_hex(payload, secret);
    secure_eq(expected.as_bytes(), provided.as_bytes())
}

/// Same check as [`verify`], failing with a provider-tagged `CallbackError`.
pub fn require_valid_signature(
    provider: ProviderName,
    payload: &[u8],
    signature: Option<&str>,
    secret: Option<&str>,
) -> PaymentResult<()> {
    let has_secret = secret.map(|s| !s.trim().is_empty()).unwrap_or(false);
    if !has_secret {
        debug!(provider = %provider, "no callback secret configured, skipping signature check");
        return Ok(());
    }
    if signature.map(|s| s.trim().is_empty()).unwrap_or(true) {
        warn!(provider = %provider, error_code = "missing_signature", "callback rejected");
        return Err(PaymentError::callback(provider, "missing callback signature"));
    }
    if !verify(payload, signature, secret) {
        warn!(provider = %provider, error_code = "invalid_signature", "callback rejected");
        return Err(PaymentError::callback(provider, "invalid callback signature"));
    }
    Ok(())
}
