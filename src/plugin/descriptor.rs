// SPDX-License-Identifier: Apache-2.0

//! Plugin Descriptor Cache
//!
//! Probes each distinct plugin once per refresh by starting a single plugin
//! instance and reading its declared schema. The resulting descriptor carries
//! the schema mode, the schema hash and the SDK version that drive the diff.
//! Entries are keyed by plugin identifier and invalidated when the plugin
//! binary digest changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::plugin::registry::PluginRegistry;
use crate::plugin::traits::PluginProvider;
use crate::plugin::types::{PluginDescriptor, PluginSchema};

/// One probe per distinct plugin: the connection whose instance is started
/// to read the plugin's declared schema.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub plugin: String,
    pub connection_name: String,
    pub config_blob: String,
}

struct CacheEntry {
    binary_digest: String,
    descriptor: PluginDescriptor,
}

/// Cache of plugin descriptors, populated by probing plugin instances
pub struct PluginDescriptorCache {
    registry: Arc<PluginRegistry>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl PluginDescriptorCache {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Builds descriptors for every probe target.
    ///
    /// Plugins without a registered provider produce a `missing` descriptor;
    /// probe failures produce an `unknown` descriptor carrying the error.
    /// Neither case fails the refresh.
    pub async fn describe_all(
        &self,
        targets: &[ProbeTarget],
    ) -> BTreeMap<String, PluginDescriptor> {
        let mut descriptors = BTreeMap::new();
        for target in targets {
            let descriptor = self.describe(target).await;
            descriptors.insert(target.plugin.clone(), descriptor);
        }
        descriptors
    }

    async fn describe(&self, target: &ProbeTarget) -> PluginDescriptor {
        let Some(provider) = self.registry.get(&target.plugin) else {
            tracing::warn!(plugin = %target.plugin, "plugin binary not installed");
            return PluginDescriptor::missing(&target.plugin);
        };

        let digest = provider.binary_digest();

        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&target.plugin) {
                if entry.binary_digest == digest {
                    return entry.descriptor.clone();
                }
            }
        }

        let descriptor = match self.probe(target, provider.as_ref(), &digest).await {
            Ok(descriptor) => descriptor,
            Err(message) => {
                tracing::warn!(plugin = %target.plugin, error = %message, "plugin probe failed");
                let mut descriptor = PluginDescriptor::missing(&target.plugin);
                descriptor.binary_digest = Some(digest.clone());
                descriptor.probe_error = Some(message);
                descriptor
            }
        };

        let mut entries = self.entries.lock().await;
        entries.insert(
            target.plugin.clone(),
            CacheEntry {
                binary_digest: digest,
                descriptor: descriptor.clone(),
            },
        );

        descriptor
    }

    async fn probe(
        &self,
        target: &ProbeTarget,
        provider: &dyn PluginProvider,
        digest: &str,
    ) -> Result<PluginDescriptor, String> {
        let client = provider
            .open(&target.connection_name, &target.config_blob)
            .await
            .map_err(|e| e.to_string())?;

        let schema = client.schema().await.map_err(|e| e.to_string())?;
        let sdk_version = client.sdk_version().await.map_err(|e| e.to_string())?;
        let schema_hash = compute_schema_hash(&schema, digest);

        Ok(PluginDescriptor {
            plugin_id: target.plugin.clone(),
            sdk_version: Some(sdk_version),
            schema_mode: schema.schema_mode,
            schema_hash: Some(schema_hash),
            binary_digest: Some(digest.to_string()),
            schema: Some(schema),
            probe_error: None,
        })
    }
}

/// Fingerprint of a plugin's declared schema.
///
/// Table and column order is normalised so the hash is stable across probes;
/// the binary digest is folded in so a rebuilt plugin invalidates all of its
/// connections even when the declared shape is unchanged.
pub fn compute_schema_hash(schema: &PluginSchema, binary_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(binary_digest.as_bytes());

    let mut tables: Vec<_> = schema.tables.iter().collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));

    for table in tables {
        hasher.update(table.name.as_bytes());
        hasher.update([0u8]);

        let mut columns: Vec<_> = table.columns.iter().collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        for column in columns {
            hasher.update(column.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(column.pg_type.as_bytes());
            hasher.update([0u8]);
            hasher.update([column.nullable as u8]);
        }
    }

    format!("{:x}", hasher.finalize())
}
