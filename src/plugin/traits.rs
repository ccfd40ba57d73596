// SPDX-License-Identifier: Apache-2.0

//! Plugin capability traits
//!
//! These are the seams between the refresh engine and the per-plugin
//! transport. The transport (gRPC, in-process, test double) is opaque; a
//! provider knows how to start a plugin instance for a connection, and a
//! client exposes the declared schema of that instance.

use async_trait::async_trait;

use crate::plugin::error::PluginResult;
use crate::plugin::types::PluginSchema;

/// A live plugin instance bound to one connection's configuration
#[async_trait]
pub trait PluginClient: Send + Sync {
    /// The schema this instance declares: tables, columns, schema mode.
    async fn schema(&self) -> PluginResult<PluginSchema>;

    /// The SDK version the plugin was built against.
    async fn sdk_version(&self) -> PluginResult<semver::Version>;
}

/// Factory for plugin instances of a single plugin identifier
///
/// Absence of a provider in the [`PluginRegistry`](crate::plugin::PluginRegistry)
/// models a plugin whose binary is not installed.
#[async_trait]
pub trait PluginProvider: Send + Sync {
    /// The fully-qualified plugin identifier this provider serves.
    fn plugin_id(&self) -> &str;

    /// Content digest of the plugin binary. A changed digest invalidates
    /// cached descriptors for this plugin.
    fn binary_digest(&self) -> String;

    /// Starts a plugin instance for the named connection.
    async fn open(
        &self,
        connection_name: &str,
        config_blob: &str,
    ) -> PluginResult<Box<dyn PluginClient>>;
}
