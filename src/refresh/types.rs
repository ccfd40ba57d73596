// SPDX-License-Identifier: Apache-2.0

//! Core data model for the refresh engine
//!
//! A declared connection binds a name to a plugin and a configuration blob;
//! its materialised form is a Postgres foreign schema plus one row in the
//! `connection_state` ledger table.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A user-declared connection, as handed to the engine by the config layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// Connection name; doubles as the Postgres schema name.
    pub name: String,
    /// Fully-qualified plugin identifier.
    pub plugin: String,
    /// Instance discriminator for multi-instance plugins.
    pub plugin_instance: Option<String>,
    /// Plugin-specific configuration; opaque to the engine, hashed for the diff.
    pub config_blob: String,
    /// Declaration site, carried through to the ledger for diagnostics.
    pub file_name: Option<String>,
    pub start_line_number: Option<i32>,
    pub end_line_number: Option<i32>,
}

impl ConnectionSpec {
    /// Fingerprint of everything that makes this declaration distinct.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.plugin.as_bytes());
        hasher.update([0u8]);
        if let Some(instance) = &self.plugin_instance {
            hasher.update(instance.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.config_blob.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Connection lifecycle states as stored in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    PendingIncomplete,
    Updating,
    Deleting,
    Ready,
    Error,
    Deleted,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::PendingIncomplete => "pending_incomplete",
            ConnectionState::Updating => "updating",
            ConnectionState::Deleting => "deleting",
            ConnectionState::Ready => "ready",
            ConnectionState::Error => "error",
            ConnectionState::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_incomplete" => Some(ConnectionState::PendingIncomplete),
            "updating" => Some(ConnectionState::Updating),
            "deleting" => Some(ConnectionState::Deleting),
            "ready" => Some(ConnectionState::Ready),
            "error" => Some(ConnectionState::Error),
            "deleted" => Some(ConnectionState::Deleted),
            _ => None,
        }
    }

    /// States that a previous refresh finished in. Anything else was left
    /// mid-flight and must be re-run.
    pub fn is_settled(&self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Error)
    }
}

/// One row of the `connection_state` ledger table
///
/// Field order and names mirror the table columns; the same shape is
/// serialised into the snapshot file, so readers must tolerate nulls.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerRow {
    pub name: String,
    pub state: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    pub connection_mod_time: Option<DateTime<Utc>>,
    pub plugin: Option<String>,
    pub plugin_instance: Option<String>,
    pub schema_mode: Option<String>,
    pub schema_hash: Option<String>,
    pub comments_set: Option<bool>,
    pub error: Option<String>,
    pub state_reason: Option<String>,
    pub file_name: Option<String>,
    pub start_line_number: Option<i32>,
    pub end_line_number: Option<i32>,
    /// Added by ledger schema v2; absent from v1 snapshots.
    #[serde(default)]
    pub connection_hash: Option<String>,
}

impl LedgerRow {
    pub fn connection_state(&self) -> Option<ConnectionState> {
        ConnectionState::parse(&self.state)
    }

    pub fn is_ready(&self) -> bool {
        self.connection_state() == Some(ConnectionState::Ready)
    }

    pub fn is_settled(&self) -> bool {
        self.connection_state().map(|s| s.is_settled()).unwrap_or(false)
    }
}

/// The actions a refresh must take, computed by the diff builder
///
/// The action sets are pairwise disjoint; together with `unchanged` and the
/// names under `missing_plugins` they cover `declared ∪ existing`.
#[derive(Debug, Default)]
pub struct ConnectionUpdates {
    pub create: BTreeMap<String, ConnectionSpec>,
    pub update: BTreeMap<String, ConnectionSpec>,
    pub delete: BTreeSet<String>,
    /// Plugin identifier -> declared connections whose binary is absent.
    pub missing_plugins: BTreeMap<String, Vec<String>>,
    pub unchanged: BTreeSet<String>,
    /// Updates of dynamic-schema plugins whose schema hash changed; clients
    /// use these to invalidate per-connection schema caches.
    pub dynamic_updates: BTreeSet<String>,
    /// Creates and schema-hash-only updates of static-schema plugins; these
    /// may be materialised by cloning the plugin's exemplar schema.
    pub clone_eligible: BTreeSet<String>,
}

impl ConnectionUpdates {
    pub fn has_updates(&self) -> bool {
        !self.create.is_empty() || !self.update.is_empty() || !self.delete.is_empty()
    }

    /// All connections that need their foreign schema (re)imported.
    pub fn upserts(&self) -> BTreeMap<String, ConnectionSpec> {
        let mut all = self.create.clone();
        all.extend(self.update.clone());
        all
    }
}

/// Payload published on the schema-change NOTIFY channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaUpdateNotification {
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl SchemaUpdateNotification {
    pub fn new(updated: Vec<String>, deleted: Vec<String>) -> Self {
        Self { updated, deleted }
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Engine configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshOptions {
    /// Connections to treat as updates regardless of hash comparison.
    pub force_update: Vec<String>,
    /// Enables the comment-writing pass after a successful refresh.
    pub schema_comments: bool,
    /// Overrides the DDL executor concurrency bound.
    pub pool_size: Option<u32>,
    /// Enables the schema-change notification after the exemplar wave.
    pub notify: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            force_update: Vec::new(),
            schema_comments: false,
            pool_size: None,
            notify: true,
        }
    }
}

/// The single result object every refresh terminates with
///
/// A non-empty `failed_connections` is not a process-level failure; queries
/// against the non-failed connections keep working.
#[derive(Debug, Serialize)]
pub struct RefreshOutcome {
    pub refresh_id: Uuid,
    pub updated_connections: bool,
    pub failed_connections: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub fatal_error: Option<String>,
}

impl RefreshOutcome {
    pub fn new() -> Self {
        Self {
            refresh_id: Uuid::new_v4(),
            updated_connections: false,
            failed_connections: BTreeMap::new(),
            warnings: Vec::new(),
            fatal_error: None,
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_failed_connection(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.failed_connections.insert(name.into(), message.into());
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal_error.is_some()
    }
}

impl Default for RefreshOutcome {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, plugin: &str, blob: &str) -> ConnectionSpec {
        ConnectionSpec {
            name: name.to_string(),
            plugin: plugin.to_string(),
            plugin_instance: None,
            config_blob: blob.to_string(),
            file_name: None,
            start_line_number: None,
            end_line_number: None,
        }
    }

    #[test]
    fn test_config_hash_changes_with_blob_and_plugin() {
        let a = spec("aws1", "aws", "regions = [\"us-east-1\"]");
        let same = spec("aws2", "aws", "regions = [\"us-east-1\"]");
        let other_blob = spec("aws1", "aws", "regions = [\"eu-west-1\"]");
        let other_plugin = spec("aws1", "gcp", "regions = [\"us-east-1\"]");

        // The name does not participate; two connections with identical
        // plugin + config hash the same.
        assert_eq!(a.config_hash(), same.config_hash());
        assert_ne!(a.config_hash(), other_blob.config_hash());
        assert_ne!(a.config_hash(), other_plugin.config_hash());
    }

    #[test]
    fn test_connection_state_round_trip() {
        for state in [
            ConnectionState::PendingIncomplete,
            ConnectionState::Updating,
            ConnectionState::Deleting,
            ConnectionState::Ready,
            ConnectionState::Error,
            ConnectionState::Deleted,
        ] {
            assert_eq!(ConnectionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ConnectionState::parse("nonsense"), None);
    }

    #[test]
    fn test_ledger_row_tolerates_unknown_snapshot_fields() {
        let json = r#"{
            "name": "aws1",
            "state": "ready",
            "type": null,
            "plugin": "aws",
            "schema_hash": "abc",
            "some_future_field": 42
        }"#;
        let row: LedgerRow = serde_json::from_str(json).expect("should parse");
        assert_eq!(row.name, "aws1");
        assert!(row.is_ready());
        assert_eq!(row.connection_hash, None);
    }

    #[test]
    fn test_notification_payload_shape() {
        let notification = SchemaUpdateNotification::new(
            vec!["aws1".to_string(), "gcp1".to_string()],
            vec!["old1".to_string()],
        );
        let payload = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"updated": ["aws1", "gcp1"], "deleted": ["old1"]})
        );
    }

    #[test]
    fn test_refresh_options_defaults() {
        let options: RefreshOptions = serde_json::from_str("{}").unwrap();
        assert!(options.notify);
        assert!(!options.schema_comments);
        assert!(options.force_update.is_empty());
        assert_eq!(options.pool_size, None);
    }
}
