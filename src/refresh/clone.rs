// SPDX-License-Identifier: Apache-2.0

//! Clone fast-path
//!
//! For static-schema plugins every connection exposes identical tables, so a
//! sibling connection can be materialised by copying an already-imported
//! foreign schema instead of re-introspecting the plugin. Per-plugin schema
//! introspection is the dominant refresh cost; with hundreds of connections
//! per plugin the clone path cuts refresh time by an order of magnitude.
//!
//! The exemplar map records, per plugin, the connection whose schema became
//! ready in the exemplar wave. A clone failure falls back to a full import
//! for that one connection and does not disable cloning for others.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::plugin::types::{PluginDescriptor, SchemaMode};
use crate::refresh::executor::{LedgerTransition, WorkUnit};
use crate::refresh::sql;
use crate::refresh::types::ConnectionSpec;

/// Tracks the clone source for each static-schema plugin
#[derive(Default)]
pub struct CloneEngine {
    exemplars: Mutex<HashMap<String, String>>,
}

impl CloneEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly-materialised exemplar for a plugin. Only called for
    /// connections that reached `ready` in the exemplar wave.
    pub async fn record_exemplar(&self, plugin: &str, connection: &str) {
        let mut exemplars = self.exemplars.lock().await;
        exemplars.insert(plugin.to_string(), connection.to_string());
    }

    /// Immutable view of the exemplar map for planning one wave.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.exemplars.lock().await.clone()
    }
}

/// Builds the work unit for one remainder-wave connection.
///
/// Clone-eligible connections of static-schema plugins with a ready exemplar
/// get a `clone_foreign_schema` unit whose fallback is the full import;
/// everything else gets a plain import unit.
pub fn plan_remainder_unit(
    spec: &ConnectionSpec,
    descriptor: &PluginDescriptor,
    clone_eligible: bool,
    exemplars: &HashMap<String, String>,
) -> WorkUnit {
    let remote_schema = sql::plugin_remote_schema(&spec.plugin);
    let import_statements = sql::update_connection_statements(&spec.name, &remote_schema);
    let transition = LedgerTransition::Ready {
        plugin_schema_hash: descriptor.schema_hash.clone(),
        connection_hash: spec.config_hash(),
    };

    let clone_source = if clone_eligible && descriptor.schema_mode == SchemaMode::Static {
        exemplars.get(&spec.plugin)
    } else {
        None
    };

    match clone_source {
        Some(exemplar) => WorkUnit {
            connection: spec.name.clone(),
            statements: vec![
                sql::delete_connection_statement(&spec.name),
                sql::clone_schema_statement(exemplar, &spec.name, &spec.plugin),
            ],
            fallback_statements: Some(import_statements),
            transition,
        },
        None => WorkUnit {
            connection: spec.name.clone(),
            statements: import_statements,
            fallback_statements: None,
            transition,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, plugin: &str) -> ConnectionSpec {
        ConnectionSpec {
            name: name.to_string(),
            plugin: plugin.to_string(),
            plugin_instance: None,
            config_blob: String::new(),
            file_name: None,
            start_line_number: None,
            end_line_number: None,
        }
    }

    fn descriptor(plugin: &str, mode: SchemaMode) -> PluginDescriptor {
        PluginDescriptor {
            plugin_id: plugin.to_string(),
            sdk_version: Some(semver::Version::new(5, 0, 0)),
            schema_mode: mode,
            schema_hash: Some("h1".to_string()),
            binary_digest: None,
            schema: None,
            probe_error: None,
        }
    }

    #[tokio::test]
    async fn test_clone_unit_with_import_fallback() {
        let engine = CloneEngine::new();
        engine.record_exemplar("aws", "aws1").await;
        let exemplars = engine.snapshot().await;

        let unit = plan_remainder_unit(
            &spec("aws2", "aws"),
            &descriptor("aws", SchemaMode::Static),
            true,
            &exemplars,
        );

        assert!(unit.statements[1].contains("clone_foreign_schema('aws1', 'aws2', 'aws')"));
        let fallback = unit.fallback_statements.expect("fallback present");
        assert!(fallback.iter().any(|s| s.contains("import foreign schema")));
        assert!(matches!(unit.transition, LedgerTransition::Ready { .. }));
    }

    #[tokio::test]
    async fn test_no_exemplar_means_plain_import() {
        let engine = CloneEngine::new();
        let exemplars = engine.snapshot().await;

        let unit = plan_remainder_unit(
            &spec("aws2", "aws"),
            &descriptor("aws", SchemaMode::Static),
            true,
            &exemplars,
        );

        assert!(unit.statements.iter().any(|s| s.contains("import foreign schema")));
        assert!(unit.fallback_statements.is_none());
    }

    #[tokio::test]
    async fn test_dynamic_plugin_never_clones() {
        let engine = CloneEngine::new();
        engine.record_exemplar("csv", "csv1").await;
        let exemplars = engine.snapshot().await;

        let unit = plan_remainder_unit(
            &spec("csv2", "csv"),
            &descriptor("csv", SchemaMode::Dynamic),
            true,
            &exemplars,
        );

        assert!(unit.fallback_statements.is_none());
        assert!(!unit.statements.iter().any(|s| s.contains("clone_foreign_schema")));
    }

    #[tokio::test]
    async fn test_config_change_never_clones() {
        let engine = CloneEngine::new();
        engine.record_exemplar("aws", "aws1").await;
        let exemplars = engine.snapshot().await;

        let unit = plan_remainder_unit(
            &spec("aws2", "aws"),
            &descriptor("aws", SchemaMode::Static),
            false,
            &exemplars,
        );

        assert!(unit.fallback_statements.is_none());
    }
}
