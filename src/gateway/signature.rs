//! Provider webhook signature validation.
//!
//! The provider signs the raw request body with HMAC-SHA256 and sends the
//! hex digest as `X-Hub-Signature-256: sha256=<hex>`. Validation happens
//! against the raw bytes, before any JSON parsing, and the comparison is
//! constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Verify `sha256=<hex>` against the raw body.
///
/// Returns `false` for a missing/malformed header or a digest mismatch.
pub fn verify_signature(raw_body: &[u8], signature_header: Option<&str>, app_secret: &str) -> bool {
    let Some(header) = signature_header else {
        return false;
    };
    let Some(provided_hex) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&provided).is_ok()
}

/// Compute the signature header value for a body. Used by tests and by
/// deployments that need to re-sign when proxying.
pub fn sign(raw_body: &[u8], app_secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(raw_body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
