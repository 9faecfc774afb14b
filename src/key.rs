// SPDX-License-Identifier: MIT OR Apache-2.0
//! Master-key lifecycle: generation, passphrase derivation, epoch rotation.
//!
//! Key material is persisted in a JSON keyring file holding one entry per
//! key epoch. Generated keys are stored directly (base64); passphrase-derived
//! keys store only their salt and iteration count, and the passphrase must be
//! re-supplied at load. Rotation appends a new epoch before any secret is
//! re-encrypted and prunes retired epochs only after the full pass, so every
//! ciphertext blob always names a key the ring can produce.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{atomic, Result, VaultError};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Salt size for passphrase derivation.
pub const SALT_SIZE: usize = 16;

/// Default PBKDF2-HMAC-SHA256 iteration count.
pub(crate) const KDF_ITERATIONS: u32 = 100_000;

/// Symmetric master key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Generate a fresh key with full entropy from the OS CSPRNG.
    ///
    /// Suitable for direct use as an AES-256 key; this is not a
    /// human-memorable passphrase.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Stretch a passphrase into key material via PBKDF2-HMAC-SHA256.
    ///
    /// Deterministic for a given `(passphrase, salt, iterations)` triple;
    /// the salt must be persisted for the key to be re-derivable.
    pub fn derive(passphrase: &str, salt: &[u8; SALT_SIZE], iterations: u32) -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut bytes);
        Self { bytes }
    }

    /// Raw key bytes, for keying a cipher.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Construct from raw bytes (for testing).
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }
}

/// Where the master key for a store comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Generate a full-entropy key and persist it in the keyring.
    Generate,
    /// Derive the key from this passphrase; only the salt is persisted.
    Passphrase(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum KeyProvenance {
    Generated,
    Derived,
}

/// One persisted key epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyEntry {
    epoch: u32,
    provenance: KeyProvenance,
    /// Base64 key material; present only for generated keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    /// Base64 derivation salt; present only for derived keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    /// PBKDF2 iteration count; present only for derived keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iterations: Option<u32>,
    created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyringFile {
    current_epoch: u32,
    entries: Vec<KeyEntry>,
}

/// Owns the keyring file and the materialized key for each live epoch.
pub struct MasterKeyManager {
    path: PathBuf,
    file: KeyringFile,
    keys: Vec<(u32, MasterKey)>,
    iterations: u32,
}

impl MasterKeyManager {
    /// Load the keyring at `path`, or create it from `source` if absent.
    ///
    /// An existing key file is never overwritten. Loading a keyring that
    /// contains passphrase-derived epochs requires `source` to carry the
    /// passphrase; a generated-only keyring loads with either source.
    pub fn load_or_create(
        path: impl AsRef<Path>,
        source: &KeySource,
        iterations: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            Self::load(path, source, iterations)
        } else {
            Self::create(path, source, iterations)
        }
    }

    fn load(path: PathBuf, source: &KeySource, iterations: u32) -> Result<Self> {
        let raw = std::fs::read(&path)?;
        let file: KeyringFile = serde_json::from_slice(&raw)
            .map_err(|e| VaultError::Corrupt(format!("keyring {}: {e}", path.display())))?;

        let mut keys = Vec::with_capacity(file.entries.len());
        for entry in &file.entries {
            keys.push((entry.epoch, Self::materialize(entry, source)?));
        }

        let manager = Self {
            path,
            file,
            keys,
            iterations,
        };
        manager.current_key()?; // current epoch must be resolvable
        Ok(manager)
    }

    fn create(path: PathBuf, source: &KeySource, iterations: u32) -> Result<Self> {
        let created_at = crate::now_millis();
        let (entry, key) = match source {
            KeySource::Generate => {
                let key = MasterKey::generate();
                let entry = KeyEntry {
                    epoch: 1,
                    provenance: KeyProvenance::Generated,
                    key: Some(BASE64.encode(key.as_bytes())),
                    salt: None,
                    iterations: None,
                    created_at,
                };
                (entry, key)
            }
            KeySource::Passphrase(passphrase) => {
                let mut salt = [0u8; SALT_SIZE];
                OsRng.fill_bytes(&mut salt);
                let key = MasterKey::derive(passphrase, &salt, iterations);
                let entry = KeyEntry {
                    epoch: 1,
                    provenance: KeyProvenance::Derived,
                    key: None,
                    salt: Some(BASE64.encode(salt)),
                    iterations: Some(iterations),
                    created_at,
                };
                (entry, key)
            }
        };

        let file = KeyringFile {
            current_epoch: 1,
            entries: vec![entry],
        };
        let manager = Self {
            path,
            file,
            keys: vec![(1, key)],
            iterations,
        };
        manager.persist()?;
        Ok(manager)
    }

    /// Turn a persisted entry back into key material.
    fn materialize(entry: &KeyEntry, source: &KeySource) -> Result<MasterKey> {
        match entry.provenance {
            KeyProvenance::Generated => {
                let encoded = entry.key.as_deref().ok_or_else(|| {
                    VaultError::Corrupt(format!("epoch {}: generated key missing", entry.epoch))
                })?;
                let decoded = BASE64.decode(encoded).map_err(|_| {
                    VaultError::Corrupt(format!("epoch {}: key is not valid base64", entry.epoch))
                })?;
                let bytes: [u8; KEY_SIZE] = decoded.try_into().map_err(|_| {
                    VaultError::Corrupt(format!("epoch {}: wrong key length", entry.epoch))
                })?;
                Ok(MasterKey { bytes })
            }
            KeyProvenance::Derived => {
                let KeySource::Passphrase(passphrase) = source else {
                    return Err(VaultError::KeyDerivation(format!(
                        "epoch {} is passphrase-derived; a passphrase is required to open \
                         this keyring",
                        entry.epoch
                    )));
                };
                let encoded = entry.salt.as_deref().ok_or_else(|| {
                    VaultError::Corrupt(format!("epoch {}: derivation salt missing", entry.epoch))
                })?;
                let decoded = BASE64.decode(encoded).map_err(|_| {
                    VaultError::Corrupt(format!("epoch {}: salt is not valid base64", entry.epoch))
                })?;
                let salt: [u8; SALT_SIZE] = decoded.try_into().map_err(|_| {
                    VaultError::Corrupt(format!("epoch {}: wrong salt length", entry.epoch))
                })?;
                let rounds = entry.iterations.unwrap_or(KDF_ITERATIONS);
                Ok(MasterKey::derive(passphrase, &salt, rounds))
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.file)
            .map_err(|e| VaultError::Corrupt(format!("keyring serialization: {e}")))?;
        atomic::atomic_write(&self.path, &body)
    }

    /// The epoch new ciphertext is written under.
    pub fn current_epoch(&self) -> u32 {
        self.file.current_epoch
    }

    /// Key material for the current epoch.
    pub fn current_key(&self) -> Result<&MasterKey> {
        self.key_for_epoch(self.file.current_epoch).ok_or_else(|| {
            VaultError::Corrupt(format!(
                "keyring has no entry for current epoch {}",
                self.file.current_epoch
            ))
        })
    }

    /// Key material for an arbitrary live epoch, if still in the ring.
    pub fn key_for_epoch(&self, epoch: u32) -> Option<&MasterKey> {
        self.keys
            .iter()
            .find(|(e, _)| *e == epoch)
            .map(|(_, key)| key)
    }

    /// Epochs currently held in the ring, oldest first.
    pub fn epochs(&self) -> Vec<u32> {
        self.keys.iter().map(|(e, _)| *e).collect()
    }

    /// Begin a master-key rotation: append a fresh generated epoch and make
    /// it current, persisting the ring with both old and new keys durable.
    pub(crate) fn begin_rotation(&mut self) -> Result<u32> {
        let next = self
            .file
            .entries
            .iter()
            .map(|e| e.epoch)
            .max()
            .unwrap_or(0)
            + 1;
        let key = MasterKey::generate();
        self.file.entries.push(KeyEntry {
            epoch: next,
            provenance: KeyProvenance::Generated,
            key: Some(BASE64.encode(key.as_bytes())),
            salt: None,
            iterations: None,
            created_at: crate::now_millis(),
        });
        self.file.current_epoch = next;
        self.keys.push((next, key));
        self.persist()?;
        Ok(next)
    }

    /// Finish a rotation: drop every retired epoch and persist the ring.
    pub(crate) fn finish_rotation(&mut self) -> Result<()> {
        let current = self.file.current_epoch;
        self.file.entries.retain(|e| e.epoch == current);
        self.keys.retain(|(e, _)| *e == current);
        self.persist()
    }

    /// Iteration count used for new passphrase derivations.
    pub fn kdf_iterations(&self) -> u32 {
        self.iterations
    }
}
