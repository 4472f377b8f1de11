//! Payment signature verification.
//!
//! After hosted checkout the gateway hands the browser a signature equal to
//! `hex(HMAC-SHA256(key_secret, "<order_id>|<payment_id>"))`. The browser
//! relays it to us and this module decides whether it is genuine.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded SHA-256 MAC.
const SIGNATURE_HEX_LEN: usize = 64;

fn keyed_mac(order_id: &str, payment_id: &str, secret: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    mac
}

/// Lowercase hex signature the gateway would produce for this pair.
pub fn expected_signature(order_id: &str, payment_id: &str, secret: &str) -> String {
    hex::encode(keyed_mac(order_id, payment_id, secret).finalize().into_bytes())
}

/// Returns true iff `provided` is exactly the expected signature.
///
/// The MAC comparison is constant-time. Anything that is not 64 lowercase hex
/// characters is a mismatch, never an error.
pub fn verify(order_id: &str, payment_id: &str, provided: &str, secret: &str) -> bool {
    if provided.len() != SIGNATURE_HEX_LEN
        || !provided
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }

    let Ok(provided_bytes) = hex::decode(provided) else {
        return false;
    };

    keyed_mac(order_id, payment_id, secret)
        .verify_slice(&provided_bytes)
        .is_ok()
}
