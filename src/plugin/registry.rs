// SPDX-License-Identifier: Apache-2.0

//! Plugin Provider Registry
//!
//! Central registry for installed plugin providers, keyed by fully-qualified
//! plugin identifier. A plugin that is declared in config but has no
//! registered provider is treated as missing by the diff builder.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::traits::PluginProvider;

/// Registry that holds the providers for all installed plugins
pub struct PluginRegistry {
    providers: HashMap<String, Arc<dyn PluginProvider>>,
}

impl PluginRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registers a provider
    ///
    /// The provider's `plugin_id()` is used as the key.
    pub fn register(&mut self, provider: Arc<dyn PluginProvider>) {
        let id = provider.plugin_id().to_string();
        self.providers.insert(id, provider);
    }

    /// Gets a provider by plugin identifier
    pub fn get(&self, plugin_id: &str) -> Option<Arc<dyn PluginProvider>> {
        self.providers.get(plugin_id).cloned()
    }

    /// True if a provider is installed for the plugin identifier
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.providers.contains_key(plugin_id)
    }

    /// Lists all registered plugin identifiers
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    /// Returns the number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
