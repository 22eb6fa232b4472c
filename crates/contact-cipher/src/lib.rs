//! Platform PII cipher for guest contact values.
//!
//! ChaCha20-Poly1305 with a versioned key ring: ciphertexts are stored as
//! `enc:v<version>:<base64(nonce || ciphertext)>`, so contacts encrypted
//! under an older key stay readable after rotation. The search hash is a
//! keyed HMAC so equality lookups over encrypted columns never see
//! plaintext.
//!
//! The delivery engine only consumes this through the
//! [`ContactCipher`] trait; the rest of the platform shares the same
//! implementation for writing contacts in the first place.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hmac::{Hmac, Mac};
use notify_channels::ContactCipher;
use outbox_core::{DeliveryError, DeliveryResult};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Versioned-key PII cipher.
pub struct PiiCipher {
    keys: HashMap<u32, [u8; KEY_SIZE]>,
    current_version: u32,
}

impl PiiCipher {
    /// Build a cipher from a key ring. `current_version` must be present in
    /// the ring; it is the version new ciphertexts are written under.
    pub fn new(keys: HashMap<u32, [u8; KEY_SIZE]>, current_version: u32) -> DeliveryResult<Self> {
        if !keys.contains_key(&current_version) {
            return Err(DeliveryError::configuration(format!(
                "PII key ring has no key for current version {current_version}"
            )));
        }
        Ok(Self {
            keys,
            current_version,
        })
    }

    /// Single-key convenience constructor (version 1).
    pub fn with_key(key: [u8; KEY_SIZE]) -> Self {
        Self {
            keys: HashMap::from([(1, key)]),
            current_version: 1,
        }
    }

    /// Parse a base64-encoded 32-byte key, e.g. from the environment.
    pub fn parse_key(encoded: &str) -> DeliveryResult<[u8; KEY_SIZE]> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| DeliveryError::configuration(format!("PII key is not base64: {e}")))?;
        bytes.try_into().map_err(|_| {
            DeliveryError::configuration(format!("PII key must be {KEY_SIZE} bytes"))
        })
    }

    pub fn generate_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    fn key_for(&self, version: u32) -> DeliveryResult<&[u8; KEY_SIZE]> {
        self.keys.get(&version).ok_or_else(|| {
            DeliveryError::configuration(format!("PII key ring has no key for version {version}"))
        })
    }
}

impl ContactCipher for PiiCipher {
    fn encrypt(&self, plaintext: &str) -> DeliveryResult<String> {
        let key = self.key_for(self.current_version)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| DeliveryError::configuration(e.to_string()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| DeliveryError::permanent_payload(format!("encrypt: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!(
            "enc:v{}:{}",
            self.current_version,
            BASE64.encode(sealed)
        ))
    }

    fn decrypt(&self, ciphertext: &str, key_version: u32) -> DeliveryResult<String> {
        let key = self.key_for(key_version)?;

        let sealed = BASE64.decode(ciphertext).map_err(|_| {
            DeliveryError::permanent_payload("contact ciphertext is not valid base64")
        })?;
        if sealed.len() <= NONCE_SIZE {
            return Err(DeliveryError::permanent_payload(
                "contact ciphertext too short",
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| DeliveryError::configuration(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DeliveryError::permanent_payload("contact decryption failed"))?;

        String::from_utf8(plaintext)
            .map_err(|_| DeliveryError::permanent_payload("contact is not valid UTF-8"))
    }

    fn derive_search_hash(&self, plaintext: &str) -> String {
        // Keyed under the current key so the hash leaks nothing without it.
        // Rotation of the search key requires a backfill, which the platform
        // runs as part of key rotation anyway.
        let key = self
            .keys
            .get(&self.current_version)
            .expect("current version checked at construction");
        let mut mac =
            <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(plaintext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
