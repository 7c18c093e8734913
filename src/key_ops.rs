// src/key_ops.rs
//! Key material handling
//!
//! Operator secrets arrive as strings (CLI flag, env var, prompt). They are
//! stretched into 256-bit field keys with blake3's KDF mode and never leave
//! process memory. Both the secret and the derived key zeroize on drop.

use std::fmt;
use std::io::{self, IsTerminal};

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aliases::KeySecret;
use crate::consts::{FIELD_KEY_CONTEXT, FINGERPRINT_HEX_LEN};
use crate::error::{RekeyError, Result};

/// 256-bit field encryption key, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FieldKey {
    bytes: [u8; 32],
}

impl FieldKey {
    /// Derive a field key from an operator-supplied secret
    pub fn derive(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(RekeyError::Config("key secret must not be empty".into()));
        }
        Ok(Self {
            bytes: blake3::derive_key(FIELD_KEY_CONTEXT, secret.as_bytes()),
        })
    }

    #[inline]
    pub fn expose_secret(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Short, non-reversible identifier safe to write to logs
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&self.bytes);
        let mut hex = hex::encode(digest.as_bytes());
        hex.truncate(FINGERPRINT_HEX_LEN);
        hex
    }
}

impl PartialEq for FieldKey {
    fn eq(&self, other: &Self) -> bool {
        // constant-time compare via blake3's Hash equality
        blake3::hash(&self.bytes) == blake3::hash(&other.bytes)
    }
}

impl Eq for FieldKey {}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldKey({})", self.fingerprint())
    }
}

/// Which side of a re-encryption a key plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Source,
    Destination,
}

/// Source/destination keys for one run
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub source: FieldKey,
    pub destination: FieldKey,
}

impl KeyPair {
    /// Validate and derive both keys. Missing, empty, or identical secrets are rejected.
    pub fn new(source: &str, destination: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(RekeyError::Config("source key is missing".into()));
        }
        if destination.trim().is_empty() {
            return Err(RekeyError::Config("destination key is missing".into()));
        }
        if source == destination {
            return Err(RekeyError::Config(
                "source and destination keys must differ".into(),
            ));
        }

        let pair = Self {
            source: FieldKey::derive(source)?,
            destination: FieldKey::derive(destination)?,
        };
        if pair.source == pair.destination {
            return Err(RekeyError::Config(
                "source and destination keys derive to the same field key".into(),
            ));
        }
        Ok(pair)
    }

    /// Same as [`KeyPair::new`] but for optional inputs straight from the CLI
    pub fn from_optional(source: Option<&KeySecret>, destination: Option<&KeySecret>) -> Result<Self> {
        let source = source.ok_or_else(|| RekeyError::Config("source key is missing".into()))?;
        let destination =
            destination.ok_or_else(|| RekeyError::Config("destination key is missing".into()))?;
        Self::new(source.as_str(), destination.as_str())
    }

    pub fn get(&self, role: KeyRole) -> &FieldKey {
        match role {
            KeyRole::Source => &self.source,
            KeyRole::Destination => &self.destination,
        }
    }

    /// The inverse pair, used when undoing a rotation
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination.clone(),
            destination: self.source.clone(),
        }
    }
}

/// Wrap a plain String as a zeroizing secret
pub fn secret(value: impl Into<String>) -> KeySecret {
    Zeroizing::new(value.into())
}

/// Use the supplied value, or prompt without echo when attached to a terminal.
/// `None` when neither is available; key validation reports it.
pub fn read_secret(value: Option<String>, prompt: &str) -> Result<Option<KeySecret>> {
    if let Some(v) = value {
        return Ok(Some(secret(v)));
    }
    if !io::stdin().is_terminal() {
        return Ok(None);
    }
    let typed = rpassword::prompt_password(prompt)?;
    Ok(Some(secret(typed.trim_end().to_owned())).filter(|s| !s.is_empty()))
}
