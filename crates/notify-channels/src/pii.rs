//! PII collaborator interface.
//!
//! Guest contact values arrive in the outbox already encrypted by the
//! platform's PII layer. The engine only ever decrypts at the transport
//! boundary and never persists plaintext back into a row.

use outbox_core::{DeliveryError, DeliveryResult};

/// Encryption primitives provided by the platform's PII layer.
pub trait ContactCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> DeliveryResult<String>;

    fn decrypt(&self, ciphertext: &str, key_version: u32) -> DeliveryResult<String>;

    /// Deterministic hash for equality search over encrypted columns.
    fn derive_search_hash(&self, plaintext: &str) -> String;
}

/// Decrypt a stored guest contact of the form `enc:v<version>:<ciphertext>`.
///
/// A value that does not parse is a producer bug, surfaced as a permanent
/// payload error rather than burning retries.
pub fn decrypt_contact(cipher: &dyn ContactCipher, stored: &str) -> DeliveryResult<String> {
    let malformed =
        || DeliveryError::permanent_payload("guest contact is not in enc:v<N>:<data> form");

    let rest = stored.strip_prefix("enc:v").ok_or_else(malformed)?;
    let (version, ciphertext) = rest.split_once(':').ok_or_else(malformed)?;
    let version: u32 = version.parse().map_err(|_| malformed())?;

    cipher.decrypt(ciphertext, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test cipher: "decryption" strips a `sealed:` marker.
    struct StubCipher;

    impl ContactCipher for StubCipher {
        fn encrypt(&self, plaintext: &str) -> DeliveryResult<String> {
            Ok(format!("sealed:{plaintext}"))
        }

        fn decrypt(&self, ciphertext: &str, _key_version: u32) -> DeliveryResult<String> {
            ciphertext
                .strip_prefix("sealed:")
                .map(str::to_string)
                .ok_or_else(|| DeliveryError::permanent_payload("bad ciphertext"))
        }

        fn derive_search_hash(&self, plaintext: &str) -> String {
            format!("hash:{plaintext}")
        }
    }

    #[test]
    fn decrypts_versioned_contact() {
        let contact =
            decrypt_contact(&StubCipher, "enc:v2:sealed:ana@example.com").unwrap();
        assert_eq!(contact, "ana@example.com");
    }

    #[test]
    fn malformed_contact_is_permanent() {
        for stored in ["plain@example.com", "enc:v:x", "enc:vtwo:x", "enc:v1"] {
            let err = decrypt_contact(&StubCipher, stored).unwrap_err();
            assert!(
                matches!(err, DeliveryError::PermanentPayload(_)),
                "{stored} should be permanent"
            );
        }
    }
}
