//! Webhook signature validation
//!
//! Inbound webhook authenticity is verified with HMAC-SHA256 over the raw
//! request body, hex-encoded, compared in constant time. Timing safety is
//! best-effort, not cryptographically audited.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook signature token against the raw request body.
///
/// The supplied token may carry a `sha256=` algorithm prefix, which is
/// stripped before comparison. A token that is not valid hex, or whose
/// decoded length differs from the digest length, fails without a full
/// comparison.
pub fn verify_signature(raw_body: &[u8], supplied: &str, secret: &str) -> bool {
    let supplied = supplied.strip_prefix("sha256=").unwrap_or(supplied);

    let supplied_bytes = match hex::decode(supplied) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    if expected.len() != supplied_bytes.len() {
        return false;
    }

    expected.ct_eq(&supplied_bytes).into()
}

/// Compute the hex signature for a body, used by tests and outbound tooling.
pub fn sign(raw_body: &[u8], secret: &str) -> String {
    #[allow(clippy::expect_used)] // HMAC accepts keys of any length
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-webhook-secret";

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"event":"messages.upsert","data":{}}"#;
        let sig = sign(body, SECRET);
        assert!(verify_signature(body, &sig, SECRET));
    }

    #[test]
    fn prefixed_signature_passes() {
        let body = b"payload";
        let sig = format!("sha256={}", sign(body, SECRET));
        assert!(verify_signature(body, &sig, SECRET));
    }

    #[test]
    fn flipped_body_byte_fails() {
        let body = b"payload-bytes".to_vec();
        let sig = sign(&body, SECRET);
        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify_signature(&tampered, &sig, SECRET),
                "flip at byte {} accepted",
                i
            );
        }
    }

    #[test]
    fn flipped_signature_char_fails() {
        let body = b"payload-bytes";
        let sig = sign(body, SECRET);
        let bytes = sig.into_bytes();
        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            // Flip to a different hex digit so the string stays decodable.
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(!verify_signature(body, &tampered, SECRET));
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = sign(body, SECRET);
        assert!(!verify_signature(body, &sig, "other-secret"));
    }

    #[test]
    fn non_hex_signature_fails() {
        assert!(!verify_signature(b"payload", "not hex at all", SECRET));
    }

    #[test]
    fn truncated_signature_fails_on_length() {
        let body = b"payload";
        let sig = sign(body, SECRET);
        assert!(!verify_signature(body, &sig[..32], SECRET));
    }
}
