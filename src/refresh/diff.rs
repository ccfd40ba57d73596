// SPDX-License-Identifier: Apache-2.0

//! Diff Builder
//!
//! Computes the actions a refresh must take from three inputs: the declared
//! connection set, the current ledger, and the probed plugin descriptors.
//! Pure function; every connection in `declared ∪ ledger` lands in exactly
//! one output bucket.

use std::collections::{BTreeMap, BTreeSet};

use crate::plugin::types::{PluginDescriptor, SchemaMode};
use crate::refresh::types::{ConnectionSpec, ConnectionUpdates, LedgerRow};

/// Builds the update set for one refresh.
///
/// Classification per declared connection:
/// - no ledger row -> create
/// - row left mid-flight by a previous refresh -> update
/// - config hash, schema hash, or force-update mismatch -> update
/// - otherwise unchanged
///
/// A connection whose plugin is unavailable keeps its materialised schema if
/// the row is already `ready` (classified unchanged) and is reported under
/// `missing_plugins` otherwise. Ledger rows with no declared counterpart are
/// deletions.
pub fn build_connection_updates(
    declared: &BTreeMap<String, ConnectionSpec>,
    ledger: &BTreeMap<String, LedgerRow>,
    descriptors: &BTreeMap<String, PluginDescriptor>,
    force_update: &BTreeSet<String>,
) -> ConnectionUpdates {
    let mut updates = ConnectionUpdates::default();

    for (name, spec) in declared {
        let row = ledger.get(name);

        let descriptor = match descriptors.get(&spec.plugin) {
            Some(descriptor) if !descriptor.is_unavailable() => descriptor,
            _ => {
                if row.map(|r| r.is_ready()).unwrap_or(false) {
                    // Retain the stale schema rather than dropping a working
                    // connection out from under attached clients.
                    updates.unchanged.insert(name.clone());
                } else {
                    updates
                        .missing_plugins
                        .entry(spec.plugin.clone())
                        .or_default()
                        .push(name.clone());
                }
                continue;
            }
        };

        match row {
            None => {
                mark_clone_eligibility(&mut updates, name, descriptor, true);
                updates.create.insert(name.clone(), spec.clone());
            }
            Some(row) => {
                let config_changed =
                    row.connection_hash.as_deref() != Some(spec.config_hash().as_str());
                let schema_changed = row.schema_hash != descriptor.schema_hash;
                let forced = force_update.contains(name);
                let unsettled = !row.is_settled();

                if config_changed || schema_changed || forced || unsettled {
                    if schema_changed && descriptor.schema_mode == SchemaMode::Dynamic {
                        updates.dynamic_updates.insert(name.clone());
                    }
                    let schema_hash_only =
                        schema_changed && !config_changed && !forced && !unsettled;
                    mark_clone_eligibility(&mut updates, name, descriptor, schema_hash_only);
                    updates.update.insert(name.clone(), spec.clone());
                } else {
                    updates.unchanged.insert(name.clone());
                }
            }
        }
    }

    for name in ledger.keys() {
        if !declared.contains_key(name) {
            updates.delete.insert(name.clone());
        }
    }

    updates
}

fn mark_clone_eligibility(
    updates: &mut ConnectionUpdates,
    name: &str,
    descriptor: &PluginDescriptor,
    schema_only_change: bool,
) {
    if schema_only_change && descriptor.schema_mode == SchemaMode::Static {
        updates.clone_eligible.insert(name.to_string());
    }
}
