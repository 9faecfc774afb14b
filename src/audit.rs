// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only audit trail for store operations.
//!
//! One JSON object per line, ordered by write time. Appends are flushed and
//! fsynced before `log` returns, so an event acknowledged to the caller
//! survives a crash. The log is advisory and deliberately decoupled from
//! [`crate::SecretStore`]: callers invoke both, and the store does not
//! enforce that every mutation is audited.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{atomic, now_millis, Result, VaultError};

/// Auditable actions, with stable snake_case wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SecretCreated,
    SecretAccessed,
    SecretRotated,
    SecretDeleted,
    SecretListed,
    MasterKeyRotated,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecretCreated => "secret_created",
            Self::SecretAccessed => "secret_accessed",
            Self::SecretRotated => "secret_rotated",
            Self::SecretDeleted => "secret_deleted",
            Self::SecretListed => "secret_listed",
            Self::MasterKeyRotated => "master_key_rotated",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unix milliseconds at append time.
    pub timestamp: i64,
    pub action: AuditAction,
    /// What the action was taken against (secret name, or `*` for
    /// store-wide actions).
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

/// Append-only event sink backed by one newline-delimited JSON file.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Open (or lazily create on first append) the log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append one event. Durable (flushed and synced) before returning.
    pub fn log(
        &self,
        action: AuditAction,
        target: impl Into<String>,
        details: BTreeMap<String, String>,
    ) -> Result<()> {
        let event = AuditEvent {
            timestamp: now_millis(),
            action,
            target: target.into(),
            details,
        };
        let mut line = serde_json::to_vec(&event)
            .map_err(|e| VaultError::Corrupt(format!("audit serialization: {e}")))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// All events in append order, or only the most recent `limit` (still
    /// oldest-first within the returned slice).
    pub fn get_logs(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        let last = lines.len().saturating_sub(1);

        let mut events = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                // A torn final line is an unflushed partial append; anything
                // earlier means the log itself is damaged.
                Err(_) if idx == last => {}
                Err(e) => {
                    return Err(VaultError::Corrupt(format!(
                        "audit log line {}: {e}",
                        idx + 1
                    )));
                }
            }
        }

        if let Some(limit) = limit {
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
        }
        Ok(events)
    }

    /// Destroy all prior events and reinitialize an empty log. Irreversible.
    pub fn clear_logs(&self) -> Result<()> {
        atomic::atomic_truncate(&self.path)
    }

    // Convenience constructors for the well-known store actions.

    pub fn log_secret_created(&self, name: &str, secret_type: &str, environment: &str) -> Result<()> {
        let mut details = BTreeMap::new();
        details.insert("secret_type".to_string(), secret_type.to_string());
        details.insert("environment".to_string(), environment.to_string());
        self.log(AuditAction::SecretCreated, name, details)
    }

    pub fn log_secret_accessed(&self, name: &str, environment: &str) -> Result<()> {
        let mut details = BTreeMap::new();
        details.insert("environment".to_string(), environment.to_string());
        self.log(AuditAction::SecretAccessed, name, details)
    }

    pub fn log_secret_rotated(&self, name: &str) -> Result<()> {
        self.log(AuditAction::SecretRotated, name, BTreeMap::new())
    }

    pub fn log_secret_deleted(&self, name: &str) -> Result<()> {
        self.log(AuditAction::SecretDeleted, name, BTreeMap::new())
    }

    pub fn log_master_key_rotated(&self, secrets_count: usize) -> Result<()> {
        let mut details = BTreeMap::new();
        details.insert("secrets_count".to_string(), secrets_count.to_string());
        self.log(AuditAction::MasterKeyRotated, "*", details)
    }
}
