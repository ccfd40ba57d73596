// SPDX-License-Identifier: Apache-2.0

//! Connection state snapshot file
//!
//! On-disk JSON mirror of the `ready` and `error` ledger rows, rewritten
//! after each successful refresh. The file is a derived cache: if it is lost
//! the next refresh rebuilds it from the ledger. It is deleted when a refresh
//! starts, so its absence marks an in-flight or crashed refresh.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::refresh::error::{RefreshError, RefreshResult};
use crate::refresh::types::{ConnectionState, LedgerRow};

/// File name of the snapshot, relative to the install directory.
pub const SNAPSHOT_FILE: &str = "connection.json";

/// Serialised view of the post-refresh ledger
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub connections: BTreeMap<String, LedgerRow>,
    pub loaded: DateTime<Utc>,
}

/// Store for the snapshot file in the install directory
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(install_dir: impl AsRef<Path>) -> Self {
        Self {
            path: install_dir.as_ref().join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the snapshot atomically: serialise to a temp file in the same
    /// directory, then rename over the target.
    pub fn save(&self, ledger: &BTreeMap<String, LedgerRow>) -> RefreshResult<()> {
        let connections: BTreeMap<String, LedgerRow> = ledger
            .iter()
            .filter(|(_, row)| {
                matches!(
                    row.connection_state(),
                    Some(ConnectionState::Ready) | Some(ConnectionState::Error)
                )
            })
            .map(|(name, row)| (name.clone(), row.clone()))
            .collect();

        let snapshot = ConnectionSnapshot {
            connections,
            loaded: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| RefreshError::snapshot(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| RefreshError::snapshot(e.to_string()))?;
        fs::rename(&temp_path, &self.path).map_err(|e| RefreshError::snapshot(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), "connection state snapshot written");
        Ok(())
    }

    /// Loads the snapshot if present. Readers tolerate unknown fields.
    pub fn load(&self) -> RefreshResult<Option<ConnectionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| RefreshError::snapshot(e.to_string()))?;
        let snapshot = serde_json::from_str(&content)
            .map_err(|e| RefreshError::snapshot(e.to_string()))?;
        Ok(Some(snapshot))
    }

    /// Removes the snapshot. Absence is not an error.
    pub fn delete(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to delete snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, state: ConnectionState) -> LedgerRow {
        LedgerRow {
            name: name.to_string(),
            state: state.as_str().to_string(),
            connection_type: None,
            connection_mod_time: Some(Utc::now()),
            plugin: Some("aws".to_string()),
            plugin_instance: None,
            schema_mode: Some("static".to_string()),
            schema_hash: Some("abc".to_string()),
            comments_set: Some(false),
            error: None,
            state_reason: None,
            file_name: None,
            start_line_number: None,
            end_line_number: None,
            connection_hash: Some("def".to_string()),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut ledger = BTreeMap::new();
        ledger.insert("aws1".to_string(), row("aws1", ConnectionState::Ready));
        ledger.insert("aws2".to_string(), row("aws2", ConnectionState::Error));

        store.save(&ledger).unwrap();
        let snapshot = store.load().unwrap().expect("snapshot present");

        assert_eq!(snapshot.connections.len(), 2);
        let restored = snapshot.connections.get("aws1").unwrap();
        assert_eq!(restored.schema_hash.as_deref(), Some("abc"));
        assert_eq!(restored.connection_hash.as_deref(), Some("def"));
    }

    #[test]
    fn test_snapshot_only_keeps_settled_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut ledger = BTreeMap::new();
        ledger.insert("aws1".to_string(), row("aws1", ConnectionState::Ready));
        ledger.insert("aws2".to_string(), row("aws2", ConnectionState::Updating));
        ledger.insert("aws3".to_string(), row("aws3", ConnectionState::Deleting));

        store.save(&ledger).unwrap();
        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.connections.len(), 1);
        assert!(snapshot.connections.contains_key("aws1"));
    }

    #[test]
    fn test_delete_absent_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.delete();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save(&BTreeMap::new()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec![SNAPSHOT_FILE.to_string()]);
    }
}
