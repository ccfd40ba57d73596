// SPDX-License-Identifier: Apache-2.0

//! Plugin capability data model
//!
//! A plugin declares a set of foreign tables. The engine never sees the
//! plugin's transport; it consumes only the declared schema and SDK version.

use serde::{Deserialize, Serialize};

/// How a plugin's schema varies across its connections.
///
/// `Static` means every connection of the plugin exposes identical tables and
/// column shapes, which makes the clone fast-path safe. `Unknown` is used for
/// plugins whose binary is absent or failed to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    Static,
    Dynamic,
    Unknown,
}

impl SchemaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaMode::Static => "static",
            SchemaMode::Dynamic => "dynamic",
            SchemaMode::Unknown => "unknown",
        }
    }
}

/// A column as declared by a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub pg_type: String,
    pub nullable: bool,
    /// Documentation string, surfaced as a Postgres column comment.
    pub comment: Option<String>,
}

/// A foreign table as declared by a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub comment: Option<String>,
}

/// The full schema a plugin declares for one of its connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSchema {
    pub tables: Vec<TableDef>,
    pub schema_mode: SchemaMode,
}

impl PluginSchema {
    /// True if any table or column carries a documentation string.
    pub fn has_comments(&self) -> bool {
        self.tables.iter().any(|t| {
            t.comment.is_some() || t.columns.iter().any(|c| c.comment.is_some())
        })
    }
}

/// Everything the refresh engine needs to know about one plugin,
/// derived from a single probe per refresh.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub plugin_id: String,
    pub sdk_version: Option<semver::Version>,
    pub schema_mode: SchemaMode,
    pub schema_hash: Option<String>,
    pub binary_digest: Option<String>,
    /// Retained so the comment writer can reuse the probe result.
    pub schema: Option<PluginSchema>,
    /// Set when the plugin binary exists but the probe failed.
    pub probe_error: Option<String>,
}

impl PluginDescriptor {
    /// Descriptor for a plugin whose binary is not installed.
    pub fn missing(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            sdk_version: None,
            schema_mode: SchemaMode::Unknown,
            schema_hash: None,
            binary_digest: None,
            schema: None,
            probe_error: None,
        }
    }

    /// True when no usable schema is available for this plugin.
    pub fn is_unavailable(&self) -> bool {
        self.schema_mode == SchemaMode::Unknown
    }
}

/// Short display name for a fully-qualified plugin identifier,
/// e.g. `hub.example.com/plugins/acme/aws@latest` -> `aws`.
pub fn plugin_short_name(fqn: &str) -> &str {
    let base = fqn.rsplit('/').next().unwrap_or(fqn);
    base.split('@').next().unwrap_or(base)
}
