// src/aliases.rs
//! Canonical value types shared across the crate

use zeroize::Zeroizing;

/// Decrypted field contents, wiped from memory on drop
pub type Plaintext = Zeroizing<Vec<u8>>;

/// Raw ciphertext envelope as stored in a PII column
pub type Ciphertext = Vec<u8>;

/// Stable row identifier (SQLite INTEGER id column)
pub type RowId = i64;

/// Operator-supplied key secret, wiped on drop
pub type KeySecret = Zeroizing<String>;
