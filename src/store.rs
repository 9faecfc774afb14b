// SPDX-License-Identifier: MIT OR Apache-2.0
//! Core store operations: store, retrieve, list, delete, rotate secrets.
//!
//! On-disk layout under the storage root:
//!
//! ```text
//! root/
//!   master.key        keyring (outside the secret tree)
//!   audit.log         append-only audit trail
//!   metadata/
//!     <name>.json     every record field except the value
//!   secrets/
//!     <name>.enc      authenticated ciphertext of the value
//! ```
//!
//! A record exists only when both artifacts exist. Writes go ciphertext
//! first, metadata second, each through stage-then-rename, so a reader never
//! observes metadata pointing at a missing or stale blob.
//!
//! The store is single-process and takes no locks. `rotate_master_key` spans
//! the whole record set and therefore requires `&mut self`; nothing else may
//! run against the store while it does.

use std::fs;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::{
    audit::AuditLog,
    encryption::{blob_epoch, Cipher},
    key::{KeySource, MasterKeyManager},
    now_millis,
    record::{validate_name, SecretMetadata, SecretRecord},
    Result, StoreConfig, VaultError,
};

/// A retrieved record plus its advisory rotation-staleness flag.
///
/// Staleness never blocks retrieval; it is only reported.
#[derive(Debug)]
pub struct RetrievedSecret {
    pub record: SecretRecord,
    pub due_for_rotation: bool,
}

/// Filters for [`SecretStore::list_secrets`]. Empty filter matches all.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub environment: Option<String>,
    pub secret_type: Option<String>,
}

impl ListFilter {
    /// Match only records in this environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Match only records of this type.
    #[must_use]
    pub fn with_secret_type(mut self, secret_type: impl Into<String>) -> Self {
        self.secret_type = Some(secret_type.into());
        self
    }

    fn matches(&self, meta: &SecretMetadata) -> bool {
        self.environment
            .as_deref()
            .map_or(true, |e| e == meta.environment)
            && self
                .secret_type
                .as_deref()
                .map_or(true, |t| t == meta.secret_type)
    }
}

/// File-backed secret store encrypted under an epoch-tracked master key.
pub struct SecretStore {
    root: PathBuf,
    metadata_dir: PathBuf,
    secrets_dir: PathBuf,
    keyring: MasterKeyManager,
    config: StoreConfig,
}

impl SecretStore {
    /// Open the store at `root` with default configuration, creating the
    /// layout and keyring on first use.
    pub fn open(root: impl AsRef<Path>, source: &KeySource) -> Result<Self> {
        Self::open_with_config(root, source, StoreConfig::default())
    }

    /// Open the store at `root`, creating `metadata/` and `secrets/` and the
    /// keyring file if they do not exist. An existing keyring is loaded,
    /// never overwritten.
    pub fn open_with_config(
        root: impl AsRef<Path>,
        source: &KeySource,
        config: StoreConfig,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let metadata_dir = root.join("metadata");
        let secrets_dir = root.join("secrets");
        fs::create_dir_all(&metadata_dir)?;
        fs::create_dir_all(&secrets_dir)?;

        let keyring =
            MasterKeyManager::load_or_create(root.join(&config.key_file), source, config.kdf_iterations)?;

        Ok(Self {
            root,
            metadata_dir,
            secrets_dir,
            keyring,
            config,
        })
    }

    /// Storage root this store was opened at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The audit sink at this store's conventional path.
    ///
    /// Auditing is decoupled from the store: operations here do not write
    /// events themselves, callers log alongside each operation.
    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(self.root.join(&self.config.audit_file))
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.metadata_dir.join(format!("{name}.json"))
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.secrets_dir.join(format!("{name}.enc"))
    }

    /// Persist a record, overwriting any existing record of the same name
    /// entirely. The value is written only as ciphertext.
    ///
    /// Rejects an empty value before any write; a secret with nothing in it
    /// is a caller bug, not a record.
    pub fn store(&self, record: &SecretRecord) -> Result<()> {
        validate_name(&record.name)?;
        if record.value.is_empty() {
            return Err(VaultError::Validation(format!(
                "secret '{}' has an empty value",
                record.name
            )));
        }

        let cipher = Cipher::new(self.keyring.current_key()?);
        let blob = cipher.encrypt(self.keyring.current_epoch(), record.value.as_bytes())?;

        // Ciphertext first, metadata second: a reader that sees metadata is
        // guaranteed a matching blob.
        crate::atomic::atomic_write(self.blob_path(&record.name), &blob)?;

        let meta = SecretMetadata::from(record);
        let body = serde_json::to_vec_pretty(&meta)
            .map_err(|e| VaultError::Corrupt(format!("metadata for '{}': {e}", record.name)))?;
        crate::atomic::atomic_write(self.metadata_path(&record.name), &body)?;

        tracing::debug!(name = %record.name, environment = %record.environment, "stored secret");
        Ok(())
    }

    /// Load and decrypt one record.
    ///
    /// Returns [`VaultError::NotFound`] if either artifact is missing, and
    /// [`VaultError::DecryptionFailed`] — distinctly — if the blob exists
    /// but fails authentication.
    pub fn retrieve(&self, name: &str) -> Result<RetrievedSecret> {
        validate_name(name)?;

        let meta_raw = match fs::read(self.metadata_path(name)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let meta: SecretMetadata = serde_json::from_slice(&meta_raw)
            .map_err(|e| VaultError::Corrupt(format!("metadata for '{name}': {e}")))?;

        let blob = match fs::read(self.blob_path(name)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Metadata without ciphertext is not a record.
                return Err(VaultError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let value = self.decrypt_value(name, &blob)?;
        let record = meta.into_record(value);
        let due_for_rotation = record.is_rotation_due(now_millis());

        Ok(RetrievedSecret {
            record,
            due_for_rotation,
        })
    }

    fn decrypt_value(&self, name: &str, blob: &[u8]) -> Result<String> {
        let epoch = blob_epoch(blob)
            .map_err(|_| VaultError::DecryptionFailed(format!("blob for '{name}' is malformed")))?;
        let key = self.keyring.key_for_epoch(epoch).ok_or_else(|| {
            VaultError::DecryptionFailed(format!(
                "blob for '{name}' was encrypted under unknown key epoch {epoch}"
            ))
        })?;
        let plaintext = Cipher::new(key)
            .decrypt(blob)
            .map_err(|_| VaultError::DecryptionFailed(format!("blob for '{name}' failed authentication")))?;
        String::from_utf8(plaintext)
            .map_err(|_| VaultError::DecryptionFailed(format!("blob for '{name}' is not valid UTF-8")))
    }

    /// All metadata records matching `filter`, sorted by name.
    ///
    /// Never loads or decrypts values: cost is O(count) metadata reads.
    pub fn list_secrets(&self, filter: &ListFilter) -> Result<Vec<SecretMetadata>> {
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.metadata_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .filter(|n| !n.starts_with('.'))
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            // Half a record (ciphertext gone) is not a record.
            if !self.blob_path(name).exists() {
                continue;
            }

            let raw = fs::read(entry.path())?;
            let meta: SecretMetadata = serde_json::from_slice(&raw)
                .map_err(|e| VaultError::Corrupt(format!("metadata for '{name}': {e}")))?;
            if filter.matches(&meta) {
                results.push(meta);
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    /// Remove both artifacts for `name`. Returns `false` if no record
    /// existed, `true` otherwise.
    pub fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;

        let meta_path = self.metadata_path(name);
        let blob_path = self.blob_path(name);
        if !meta_path.exists() && !blob_path.exists() {
            return Ok(false);
        }

        // Metadata first so listings stop showing the name immediately; an
        // orphaned blob without metadata is already "not a record".
        remove_if_present(&meta_path)?;
        remove_if_present(&blob_path)?;

        tracing::debug!(name, "deleted secret");
        Ok(true)
    }

    /// Replace the value of an existing record, stamping `updated_at` and
    /// `last_rotated`. Leaves the rotation policy itself untouched.
    /// Returns `false` if the record does not exist.
    pub fn rotate(&self, name: &str, new_value: impl Into<String>) -> Result<bool> {
        let mut record = match self.retrieve(name) {
            Ok(retrieved) => retrieved.record,
            Err(VaultError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        record.apply_rotation(new_value.into(), now_millis());
        self.store(&record)?;

        tracing::debug!(name, "rotated secret value");
        Ok(true)
    }

    /// Re-encrypt every secret under a freshly generated master key.
    ///
    /// The new key epoch is persisted to the keyring before any blob is
    /// touched, and retired epochs are pruned only after the full pass.
    /// Secrets are processed one at a time; a crash mid-pass leaves each
    /// blob decryptable under the epoch stamped in its header, and running
    /// the rotation again skips blobs already on the new epoch.
    ///
    /// Returns the number of secrets re-encrypted. Must not run concurrently
    /// with any other store operation (enforced by `&mut self` in-process).
    pub fn rotate_master_key(&mut self) -> Result<usize> {
        let new_epoch = self.keyring.begin_rotation()?;
        tracing::info!(new_epoch, "master key rotation started");

        let mut blob_names: Vec<String> = Vec::new();
        for entry in fs::read_dir(&self.secrets_dir)? {
            let entry = entry?;
            if let Some(name) = entry
                .file_name()
                .to_str()
                .filter(|n| !n.starts_with('.'))
                .and_then(|n| n.strip_suffix(".enc"))
            {
                blob_names.push(name.to_string());
            }
        }
        blob_names.sort();

        let new_cipher = Cipher::new(self.keyring.current_key()?);
        let mut rotated = 0usize;
        for name in &blob_names {
            let path = self.blob_path(name);
            let blob = fs::read(&path)?;
            let epoch = blob_epoch(&blob).map_err(|_| {
                VaultError::DecryptionFailed(format!("blob for '{name}' is malformed"))
            })?;
            if epoch == new_epoch {
                continue; // already rotated in an earlier, interrupted pass
            }

            let old_key = self.keyring.key_for_epoch(epoch).ok_or_else(|| {
                VaultError::DecryptionFailed(format!(
                    "blob for '{name}' was encrypted under unknown key epoch {epoch}"
                ))
            })?;
            let plaintext = Zeroizing::new(Cipher::new(old_key).decrypt(&blob)?);
            let reencrypted = new_cipher.encrypt(new_epoch, &plaintext)?;
            crate::atomic::atomic_write(&path, &reencrypted)?;

            tracing::debug!(name, from_epoch = epoch, to_epoch = new_epoch, "re-encrypted");
            rotated += 1;
        }

        self.keyring.finish_rotation()?;
        tracing::info!(rotated, new_epoch, "master key rotation finished");
        Ok(rotated)
    }

    #[cfg(test)]
    pub(crate) fn keyring(&self) -> &MasterKeyManager {
        &self.keyring
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
