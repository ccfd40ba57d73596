// SPDX-License-Identifier: Apache-2.0

//! Update validation
//!
//! Filters out updates whose plugin was built against an SDK newer than this
//! host supports. Affected connections are excluded from DDL and reported in
//! a warning; if such a connection already has a foreign schema it is dropped
//! so clients do not query tables the host cannot serve.

use std::collections::BTreeMap;

use crate::plugin::types::{plugin_short_name, PluginDescriptor};
use crate::refresh::types::{ConnectionSpec, LedgerRow};

/// Highest plugin SDK major version this host can serve.
pub const MAX_SUPPORTED_SDK_MAJOR: u64 = 5;

/// One connection excluded by validation
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub connection_name: String,
    pub plugin: String,
    pub message: String,
    /// True when a foreign schema for this connection already exists and
    /// should be dropped.
    pub should_drop_if_exists: bool,
}

/// Splits candidate upserts into validated updates and failures.
pub fn validate_updates(
    upserts: &BTreeMap<String, ConnectionSpec>,
    descriptors: &BTreeMap<String, PluginDescriptor>,
    ledger: &BTreeMap<String, LedgerRow>,
) -> (BTreeMap<String, ConnectionSpec>, Vec<ValidationFailure>) {
    let mut validated = BTreeMap::new();
    let mut failures = Vec::new();

    for (name, spec) in upserts {
        let sdk_major = descriptors
            .get(&spec.plugin)
            .and_then(|d| d.sdk_version.as_ref())
            .map(|v| v.major);

        match sdk_major {
            Some(major) if major > MAX_SUPPORTED_SDK_MAJOR => {
                failures.push(ValidationFailure {
                    connection_name: name.clone(),
                    plugin: spec.plugin.clone(),
                    message: format!(
                        "plugin '{}' requires SDK version {} but this host supports up to {}",
                        plugin_short_name(&spec.plugin),
                        major,
                        MAX_SUPPORTED_SDK_MAJOR
                    ),
                    should_drop_if_exists: ledger.contains_key(name),
                });
            }
            _ => {
                validated.insert(name.clone(), spec.clone());
            }
        }
    }

    (validated, failures)
}

/// Aggregated warning naming every connection excluded by validation.
pub fn build_validation_warning(failures: &[ValidationFailure]) -> Option<String> {
    if failures.is_empty() {
        return None;
    }

    let names: Vec<&str> = failures
        .iter()
        .map(|f| f.connection_name.as_str())
        .collect();
    let connection_label = if names.len() == 1 {
        "connection"
    } else {
        "connections"
    };

    Some(format!(
        "{} {} skipped: a newer host is required ({}). {}",
        names.len(),
        connection_label,
        names.join(", "),
        failures
            .first()
            .map(|f| f.message.clone())
            .unwrap_or_default()
    ))
}

/// Aggregated warning for plugins that are declared but not installed.
pub fn build_missing_plugin_warning(
    missing_plugins: &BTreeMap<String, Vec<String>>,
) -> Option<String> {
    if missing_plugins.is_empty() {
        return None;
    }

    let plugins: Vec<&str> = missing_plugins
        .keys()
        .map(|p| plugin_short_name(p))
        .collect();
    let connection_count: usize = missing_plugins.values().map(|c| c.len()).sum();
    let plugin_label = if plugins.len() == 1 { "plugin" } else { "plugins" };
    let verb = if plugins.len() == 1 { "is" } else { "are" };
    let connection_label = if connection_count == 1 {
        "connection"
    } else {
        "connections"
    };

    Some(format!(
        "{} {} required by {} {} {} missing: {}. Install the {} and refresh again.",
        plugins.len(),
        plugin_label,
        connection_count,
        connection_label,
        verb,
        plugins.join(", "),
        plugin_label,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::types::SchemaMode;
    use crate::refresh::types::ConnectionState;

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

    fn descriptor(plugin: &str, sdk_major: u64) -> PluginDescriptor {
        PluginDescriptor {
            plugin_id: plugin.to_string(),
            sdk_version: Some(semver::Version::new(sdk_major, 0, 0)),
            schema_mode: SchemaMode::Static,
            schema_hash: Some("h".to_string()),
            binary_digest: None,
            schema: None,
            probe_error: None,
        }
    }

    fn ledger_row(name: &str) -> LedgerRow {
        LedgerRow {
            name: name.to_string(),
            state: ConnectionState::Ready.as_str().to_string(),
            connection_type: None,
            connection_mod_time: None,
            plugin: None,
            plugin_instance: None,
            schema_mode: None,
            schema_hash: None,
            comments_set: None,
            error: None,
            state_reason: None,
            file_name: None,
            start_line_number: None,
            end_line_number: None,
            connection_hash: None,
        }
    }

    #[test]
    fn test_supported_sdk_passes() {
        let mut upserts = BTreeMap::new();
        upserts.insert("aws1".to_string(), spec("aws1", "aws"));
        let mut descriptors = BTreeMap::new();
        descriptors.insert("aws".to_string(), descriptor("aws", MAX_SUPPORTED_SDK_MAJOR));

        let (validated, failures) = validate_updates(&upserts, &descriptors, &BTreeMap::new());
        assert_eq!(validated.len(), 1);
        assert!(failures.is_empty());
    }

    #[test]
    fn test_newer_sdk_rejected_and_warned() {
        let mut upserts = BTreeMap::new();
        upserts.insert("aws1".to_string(), spec("aws1", "acme/aws@latest"));
        upserts.insert("aws2".to_string(), spec("aws2", "acme/aws@latest"));
        let mut descriptors = BTreeMap::new();
        descriptors.insert(
            "acme/aws@latest".to_string(),
            descriptor("acme/aws@latest", MAX_SUPPORTED_SDK_MAJOR + 1),
        );

        let mut ledger = BTreeMap::new();
        ledger.insert("aws1".to_string(), ledger_row("aws1"));

        let (validated, failures) = validate_updates(&upserts, &descriptors, &ledger);
        assert!(validated.is_empty());
        assert_eq!(failures.len(), 2);

        // Only the already-materialised connection needs its schema dropped.
        let by_name: BTreeMap<_, _> = failures
            .iter()
            .map(|f| (f.connection_name.as_str(), f.should_drop_if_exists))
            .collect();
        assert!(by_name["aws1"]);
        assert!(!by_name["aws2"]);

        let warning = build_validation_warning(&failures).unwrap();
        assert!(warning.contains("aws1"));
        assert!(warning.contains("aws2"));
        assert!(warning.contains("newer host"));
    }

    #[test]
    fn test_missing_plugin_warning_copy() {
        let mut missing = BTreeMap::new();
        missing.insert(
            "hub.example.com/plugins/acme/azure@latest".to_string(),
            vec!["azure1".to_string()],
        );

        let warning = build_missing_plugin_warning(&missing).unwrap();
        assert!(warning.contains("azure"));
        assert!(warning.contains("1 plugin"));
        assert!(warning.contains("1 connection"));

        assert!(build_missing_plugin_warning(&BTreeMap::new()).is_none());
    }
}
