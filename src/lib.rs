// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-backed secret storage encrypted at rest under a master key.
//!
//! Secrets are encrypted with AES-256-GCM and persisted as two artifacts per
//! name: a ciphertext blob under `secrets/` and a metadata document under
//! `metadata/`. The master key lives in a keyring file that tracks key
//! epochs, so a crash in the middle of a master-key rotation leaves every
//! secret decryptable under an identifiable key.
//!
//! Components:
//! - [`MasterKeyManager`] — key file lifecycle, PBKDF2 passphrase derivation,
//!   epoch-tracked rotation
//! - [`Cipher`] — authenticated encryption with a self-describing blob format
//! - [`SecretRecord`] — the record model with per-secret rotation policy
//! - [`SecretStore`] — CRUD and rotation over records
//! - [`AuditLog`] — append-only, durably flushed event trail
//!
//! The store is single-process and performs no locking; `rotate_master_key`
//! takes `&mut self` and must not run concurrently with other operations.

mod atomic;
mod audit;
mod encryption;
mod key;
mod record;
mod store;

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub use audit::{AuditAction, AuditEvent, AuditLog};
pub use encryption::{blob_epoch, Cipher, NONCE_SIZE};
pub use key::{KeySource, MasterKey, MasterKeyManager, KEY_SIZE, SALT_SIZE};
pub use record::{RotationPolicy, SecretMetadata, SecretRecord};
pub use store::{ListFilter, RetrievedSecret, SecretStore};

/// Error taxonomy for vault operations.
///
/// `NotFound` is a normal negative result; `DecryptionFailed` indicates
/// data-integrity risk and is always surfaced distinctly from absence.
/// Messages carry the affected name or operation, never key material or
/// plaintext values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VaultError {
    /// No record exists for the requested name.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// Ciphertext failed authentication: wrong key, corruption, or tampering.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Malformed input, rejected before any write.
    #[error("validation error: {0}")]
    Validation(String),

    /// Underlying storage unavailable or unwritable. Not retried here;
    /// retry policy belongs to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key generation or passphrase derivation failed.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// Persisted state (keyring, metadata, audit line) could not be parsed.
    #[error("corrupt state: {0}")]
    Corrupt(String),
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Configuration for opening a [`SecretStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PBKDF2-HMAC-SHA256 iteration count for passphrase-derived keys.
    pub kdf_iterations: u32,
    /// File name of the keyring within the storage root.
    pub key_file: String,
    /// File name of the audit log within the storage root.
    pub audit_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: key::KDF_ITERATIONS,
            key_file: "master.key".to_string(),
            audit_file: "audit.log".to_string(),
        }
    }
}

impl StoreConfig {
    /// Override the PBKDF2 iteration count.
    ///
    /// Applies to newly created keyrings; an existing keyring keeps the
    /// count recorded in its entries. The default is 100,000; lower counts
    /// are for tests and benchmarks only.
    #[must_use]
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Override the keyring file name.
    #[must_use]
    pub fn with_key_file(mut self, name: impl Into<String>) -> Self {
        self.key_file = name.into();
        self
    }

    /// Override the audit log file name.
    #[must_use]
    pub fn with_audit_file(mut self, name: impl Into<String>) -> Self {
        self.audit_file = name.into();
        self
    }
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
