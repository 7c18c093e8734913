// src/consts.rs
//! Shared constants

/// Rows fetched and committed per transaction
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// First byte of every field ciphertext envelope
pub const ENVELOPE_VERSION: u8 = 0x01;

/// AES-GCM nonce length (96-bit)
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length
pub const TAG_LEN: usize = 16;

/// blake3 derive_key context. Changing it invalidates every stored ciphertext
pub const FIELD_KEY_CONTEXT: &str = "pii-rekey 2025-01 field key v1";

/// Hex chars shown when fingerprinting a key in logs
pub const FINGERPRINT_HEX_LEN: usize = 12;

/// Progress ledger table name
pub const LEDGER_TABLE: &str = "rotation_progress";

/// Metadata key prefix for per-table checkpoints
pub const CHECKPOINT_PREFIX: &str = "checkpoint.";

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "pii-rekey.toml";
