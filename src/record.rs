// SPDX-License-Identifier: MIT OR Apache-2.0
//! Secret record model: one named secret, its metadata, and rotation state.
//!
//! [`SecretRecord`] is the in-memory entity and is the only place the
//! plaintext value lives. [`SecretMetadata`] is the serialized view; it has
//! no value field at all, so a metadata document can never leak plaintext by
//! construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{now_millis, Result, VaultError};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Per-secret rotation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// How often the value should be refreshed, in days.
    pub interval_days: u32,
    /// When the secret was last rotated (unix millis); `None` until the
    /// first rotation, in which case record creation is the baseline.
    pub last_rotated: Option<i64>,
}

impl RotationPolicy {
    /// A policy that has never fired.
    pub fn every_days(interval_days: u32) -> Self {
        Self {
            interval_days,
            last_rotated: None,
        }
    }
}

/// One named secret with its plaintext value and metadata.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    /// Unique name, the primary key within a store.
    pub name: String,
    /// Plaintext value. In memory only; persisted exclusively as ciphertext.
    pub value: String,
    /// Free-form classification (api_key, token, password, ...).
    pub secret_type: String,
    /// Free-form scope label.
    pub environment: String,
    /// Optional rotation schedule.
    pub rotation_policy: Option<RotationPolicy>,
    /// Open key/value annotations.
    pub metadata: BTreeMap<String, String>,
    /// Creation time, unix millis.
    pub created_at: i64,
    /// Last mutation time, unix millis. Always `>= created_at`.
    pub updated_at: i64,
    /// Last value rotation, unix millis. When present, `<= updated_at`.
    pub last_rotated: Option<i64>,
}

impl SecretRecord {
    /// Create a record with the current time and the default environment.
    ///
    /// Rejects names that are empty, overly long, or unsafe as a file stem
    /// (path separators, leading dot, control characters) before anything
    /// touches disk.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        secret_type: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        let now = now_millis();
        Ok(Self {
            name,
            value: value.into(),
            secret_type: secret_type.into(),
            environment: "default".to_string(),
            rotation_policy: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            last_rotated: None,
        })
    }

    /// Set the environment label.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Attach a rotation policy that fires every `interval_days`.
    #[must_use]
    pub fn with_rotation_interval(mut self, interval_days: u32) -> Self {
        self.rotation_policy = Some(RotationPolicy::every_days(interval_days));
        self
    }

    /// Attach one metadata annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the secret is due for rotation at `now` (unix millis).
    ///
    /// Advisory only: `true` iff a policy is set and the interval has
    /// elapsed since the last rotation, falling back to record creation
    /// when the policy has never fired.
    pub fn is_rotation_due(&self, now: i64) -> bool {
        let Some(policy) = &self.rotation_policy else {
            return false;
        };
        let baseline = policy
            .last_rotated
            .or(self.last_rotated)
            .unwrap_or(self.created_at);
        now - baseline >= i64::from(policy.interval_days) * MILLIS_PER_DAY
    }

    /// Replace the value and stamp rotation time, for `rotate`.
    pub(crate) fn apply_rotation(&mut self, new_value: String, now: i64) {
        self.value = new_value;
        self.updated_at = now;
        self.last_rotated = Some(now);
        if let Some(policy) = &mut self.rotation_policy {
            policy.last_rotated = Some(now);
        }
    }
}

/// Serialized view of a record: every field except the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub name: String,
    pub secret_type: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_policy: Option<RotationPolicy>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotated: Option<i64>,
}

impl SecretMetadata {
    /// Merge a decrypted value back into a full record.
    pub fn into_record(self, value: String) -> SecretRecord {
        SecretRecord {
            name: self.name,
            value,
            secret_type: self.secret_type,
            environment: self.environment,
            rotation_policy: self.rotation_policy,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_rotated: self.last_rotated,
        }
    }
}

impl From<&SecretRecord> for SecretMetadata {
    fn from(record: &SecretRecord) -> Self {
        Self {
            name: record.name.clone(),
            secret_type: record.secret_type.clone(),
            environment: record.environment.clone(),
            rotation_policy: record.rotation_policy.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_rotated: record.last_rotated,
        }
    }
}

/// Names become file stems under `metadata/` and `secrets/`.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VaultError::Validation("name must not be empty".to_string()));
    }
    // 255-byte file-name limit minus the longest artifact suffix (".json").
    if name.len() > 250 {
        return Err(VaultError::Validation(format!(
            "name too long: {} bytes (max 250)",
            name.len()
        )));
    }
    if name.starts_with('.') {
        return Err(VaultError::Validation(format!(
            "name must not start with '.': {name}"
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(VaultError::Validation(format!(
            "name contains path separators or control characters: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SecretRecord {
        SecretRecord::new("db_password", "s3cr3t", "password").unwrap()
    }

    #[test]
    fn test_defaults() {
        let r = record();
        assert_eq!(r.environment, "default");
        assert!(r.rotation_policy.is_none());
        assert!(r.last_rotated.is_none());
        assert_eq!(r.created_at, r.updated_at);
    }

    #[test]
    fn test_builders() {
        let r = record()
            .with_environment("prod")
            .with_rotation_interval(30)
            .with_annotation("owner", "platform-team");
        assert_eq!(r.environment, "prod");
        assert_eq!(r.rotation_policy.as_ref().unwrap().interval_days, 30);
        assert_eq!(r.metadata.get("owner").unwrap(), "platform-team");
    }

    #[test]
    fn test_name_validation() {
        assert!(SecretRecord::new("", "v", "t").is_err());
        assert!(SecretRecord::new("a/b", "v", "t").is_err());
        assert!(SecretRecord::new("a\\b", "v", "t").is_err());
        assert!(SecretRecord::new(".hidden", "v", "t").is_err());
        assert!(SecretRecord::new("..", "v", "t").is_err());
        assert!(SecretRecord::new("tab\there", "v", "t").is_err());
        assert!(SecretRecord::new("x".repeat(251), "v", "t").is_err());

        assert!(SecretRecord::new("api_key.stripe-prod", "v", "t").is_ok());
        assert!(SecretRecord::new("x".repeat(250), "v", "t").is_ok());
    }

    #[test]
    fn test_rotation_due_overdue() {
        let mut r = record();
        r.rotation_policy = Some(RotationPolicy {
            interval_days: 1,
            last_rotated: Some(now_millis() - 2 * MILLIS_PER_DAY),
        });
        assert!(r.is_rotation_due(now_millis()));
    }

    #[test]
    fn test_rotation_due_fresh() {
        let mut r = record();
        r.rotation_policy = Some(RotationPolicy {
            interval_days: 1,
            last_rotated: Some(now_millis()),
        });
        assert!(!r.is_rotation_due(now_millis()));
    }

    #[test]
    fn test_rotation_due_baseline_is_creation_when_never_rotated() {
        let mut r = record().with_rotation_interval(1);
        assert!(!r.is_rotation_due(now_millis()));

        // Pretend the record was created two days ago.
        r.created_at -= 2 * MILLIS_PER_DAY;
        assert!(r.is_rotation_due(now_millis()));
    }

    #[test]
    fn test_no_policy_never_due() {
        let r = record();
        assert!(!r.is_rotation_due(i64::MAX));
    }

    #[test]
    fn test_apply_rotation_stamps_times() {
        let mut r = record().with_rotation_interval(7);
        let before_updated = r.updated_at;
        let now = now_millis() + 10;

        r.apply_rotation("v2".to_string(), now);
        assert_eq!(r.value, "v2");
        assert_eq!(r.last_rotated, Some(now));
        assert!(r.updated_at > before_updated);
        assert_eq!(r.rotation_policy.unwrap().last_rotated, Some(now));
        assert!(r.updated_at >= r.created_at);
    }

    #[test]
    fn test_metadata_view_has_no_value_field() {
        let r = record().with_annotation("team", "infra");
        let meta = SecretMetadata::from(&r);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("s3cr3t"));
        assert!(!json.contains("\"value\""));

        let parsed: SecretMetadata = serde_json::from_str(&json).unwrap();
        let restored = parsed.into_record("s3cr3t".to_string());
        assert_eq!(restored.value, "s3cr3t");
        assert_eq!(restored.metadata.get("team").unwrap(), "infra");
    }

    #[test]
    fn test_metadata_roundtrip_with_policy() {
        let r = record().with_rotation_interval(90);
        let json = serde_json::to_vec(&SecretMetadata::from(&r)).unwrap();
        let parsed: SecretMetadata = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.rotation_policy.unwrap().interval_days, 90);
    }
}
