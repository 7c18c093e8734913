// src/cipher.rs
//! Field-level cipher adapter. Pure: no I/O, no database.
//!
//! Encryption failures are errors. Decryption never fails loudly: a value
//! that does not open under the given key yields `None`, so the engine can
//! probe the alternate key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::aliases::{Ciphertext, Plaintext};
use crate::consts::{ENVELOPE_VERSION, NONCE_LEN, TAG_LEN};
use crate::error::{RekeyError, Result};
use crate::key_ops::{FieldKey, KeyPair};

/// Seam between the engine and the concrete algorithm
pub trait FieldCipher {
    fn encrypt(&self, plaintext: &[u8], key: &FieldKey) -> Result<Ciphertext>;

    /// `None` means "not readable with this key" (wrong key, corrupt, or foreign format)
    fn decrypt(&self, ciphertext: &[u8], key: &FieldKey) -> Option<Plaintext>;
}

impl<C: FieldCipher + ?Sized> FieldCipher for &C {
    fn encrypt(&self, plaintext: &[u8], key: &FieldKey) -> Result<Ciphertext> {
        (**self).encrypt(plaintext, key)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &FieldKey) -> Option<Plaintext> {
        (**self).decrypt(ciphertext, key)
    }
}

/// AES-256-GCM with a random 96-bit nonce per value.
///
/// Envelope layout: `version (1) || nonce (12) || ciphertext || tag (16)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    pub const MIN_ENVELOPE_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

    fn aead(key: &FieldKey) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(key.expose_secret())
            .map_err(|_| RekeyError::Crypto("invalid AES-256 key length".into()))
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &FieldKey) -> Result<Ciphertext> {
        let aead = Self::aead(key)?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let sealed = aead
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| RekeyError::Crypto("AES-GCM seal failed".into()))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &FieldKey) -> Option<Plaintext> {
        if ciphertext.len() < Self::MIN_ENVELOPE_LEN || ciphertext[0] != ENVELOPE_VERSION {
            return None;
        }
        let (nonce, sealed) = ciphertext[1..].split_at(NONCE_LEN);
        let aead = Self::aead(key).ok()?;
        aead.decrypt(Nonce::from_slice(nonce), sealed)
            .ok()
            .map(Plaintext::new)
    }
}

/// Outcome of trying both keys on one stored value
#[derive(Debug)]
pub enum Probe {
    /// Opened with the source key; needs re-encryption
    Source(Plaintext),
    /// Already under the destination key; skip
    Destination,
    /// Opens with neither key; fatal
    Undecryptable,
}

/// Try the source key, then the destination key
pub fn probe<C: FieldCipher + ?Sized>(cipher: &C, value: &[u8], keys: &KeyPair) -> Probe {
    if let Some(plaintext) = cipher.decrypt(value, &keys.source) {
        return Probe::Source(plaintext);
    }
    match cipher.decrypt(value, &keys.destination) {
        Some(_) => Probe::Destination,
        None => Probe::Undecryptable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> FieldKey {
        FieldKey::derive(s).unwrap()
    }

    #[test]
    fn roundtrip_in_memory() {
        let k = key("alpha");
        let ct = AesGcmCipher.encrypt(b"jane@example.com", &k).unwrap();
        assert_eq!(ct[0], ENVELOPE_VERSION);
        let pt = AesGcmCipher.decrypt(&ct, &k).unwrap();
        assert_eq!(pt.as_slice(), b"jane@example.com");
    }

    #[test]
    fn nonces_differ_per_call() {
        let k = key("alpha");
        let a = AesGcmCipher.encrypt(b"same", &k).unwrap();
        let b = AesGcmCipher.encrypt(b"same", &k).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_and_truncated_input_is_none() {
        let k = key("alpha");
        assert!(AesGcmCipher.decrypt(b"", &k).is_none());
        assert!(AesGcmCipher.decrypt(b"plain text value", &k).is_none());

        let mut ct = AesGcmCipher.encrypt(b"value", &k).unwrap();
        ct.truncate(AesGcmCipher::MIN_ENVELOPE_LEN - 1);
        assert!(AesGcmCipher.decrypt(&ct, &k).is_none());
    }

    #[test]
    fn tampered_tag_is_none() {
        let k = key("alpha");
        let mut ct = AesGcmCipher.encrypt(b"value", &k).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(AesGcmCipher.decrypt(&ct, &k).is_none());
    }

    #[test]
    fn probe_classifies_each_case() {
        let keys = KeyPair::new("old", "new").unwrap();
        let under_old = AesGcmCipher.encrypt(b"p", &keys.source).unwrap();
        let under_new = AesGcmCipher.encrypt(b"p", &keys.destination).unwrap();
        let under_other = AesGcmCipher.encrypt(b"p", &key("third")).unwrap();

        assert!(matches!(probe(&AesGcmCipher, &under_old, &keys), Probe::Source(p) if p.as_slice() == b"p"));
        assert!(matches!(probe(&AesGcmCipher, &under_new, &keys), Probe::Destination));
        assert!(matches!(probe(&AesGcmCipher, &under_other, &keys), Probe::Undecryptable));
    }
}
