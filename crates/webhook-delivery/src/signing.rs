//! HMAC-SHA256 payload signing.
//!
//! The signature input is the exact string `"<unix-seconds>.<raw JSON body>"`
//! keyed with the shared secret; receivers recompute it to verify both
//! integrity and freshness.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Build the exact string that gets signed.
pub fn signature_input(timestamp: i64, body: &str) -> String {
    format!("{timestamp}.{body}")
}

/// Hex-encoded HMAC-SHA256 of `input` under `secret`.
pub fn sign(secret: &str, input: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Header value carrying the timestamp and the versioned signature:
/// `t=<timestamp>,v1=<hex signature>`.
pub fn signature_header(timestamp: i64, signature: &str) -> String {
    format!("t={timestamp},v1={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s";
    const TIMESTAMP: i64 = 1_700_000_000;
    const BODY: &str = r#"{"a":1}"#;

    #[test]
    fn signature_input_is_timestamp_dot_body() {
        assert_eq!(
            signature_input(TIMESTAMP, BODY),
            r#"1700000000.{"a":1}"#
        );
    }

    #[test]
    fn signature_is_deterministic_hex_sha256() {
        let input = signature_input(TIMESTAMP, BODY);
        let first = sign(SECRET, &input);
        let second = sign(SECRET, &input);

        assert_eq!(first, second);
        // SHA-256 → 32 bytes → 64 hex chars
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn any_input_change_flips_the_signature() {
        let base = sign(SECRET, &signature_input(TIMESTAMP, BODY));

        assert_ne!(base, sign("t", &signature_input(TIMESTAMP, BODY)));
        assert_ne!(base, sign(SECRET, &signature_input(TIMESTAMP + 1, BODY)));
        assert_ne!(
            base,
            sign(SECRET, &signature_input(TIMESTAMP, r#"{"a":2}"#))
        );
    }

    #[test]
    fn header_format_is_versioned() {
        assert_eq!(
            signature_header(TIMESTAMP, "abc123"),
            "t=1700000000,v1=abc123"
        );
    }
}
