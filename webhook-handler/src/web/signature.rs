//! GitHub webhook signature verification.
//!
//! GitHub signs the raw request body with HMAC-SHA1 and sends the result in
//! the `X-Hub-Signature` header as `sha1=<hex digest>`.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha1 = Hmac<Sha1>;

/// Prefix GitHub puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha1=";

/// Compute the `X-Hub-Signature` value for a body.
///
/// Returns `sha1=` followed by the lowercase hex HMAC-SHA1 of `body` keyed
/// with `secret`.
pub fn sign_blob(secret: &str, body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())?;
    mac.update(body);

    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify an `X-Hub-Signature` header value against the raw body.
///
/// The header must equal [`sign_blob`] exactly, prefix included.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected_signature = match sign_blob(secret, body) {
        Ok(s) => s,
        Err(_) => {
            warn!("signature_invalid_key");
            return false;
        }
    };

    // Constant-time comparison to prevent timing attacks
    let valid: bool = expected_signature
        .as_bytes()
        .ct_eq(signature.as_bytes())
        .into();

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            has_prefix = signature.starts_with(SIGNATURE_PREFIX),
            "signature_mismatch"
        );
    }

    valid
}
