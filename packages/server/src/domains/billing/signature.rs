//! Webhook signature verification.
//!
//! Events are authenticated with HMAC-SHA256 over the raw request body,
//! hex-encoded in the signature header. Verification runs before anything
//! is parsed or stored, and the comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body` under `secret`. Used by tests and by any
/// internal producer of events.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a presented hex signature against `body`.
pub fn verify(secret: &str, body: &[u8], presented: &str) -> bool {
    let presented = match hex::decode(presented.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&presented).is_ok()
}
