// SPDX-License-Identifier: Apache-2.0

//! Search-Path Planner
//!
//! Unqualified SQL identifiers resolve against the first matching schema in
//! the session search path. Until a plugin's first-in-search-path connection
//! (its exemplar) is materialised, unqualified queries against that plugin
//! fail. The planner therefore splits validated updates into an exemplar
//! wave, which must fully commit and be announced before anything else, and
//! a remainder wave.

use std::collections::{BTreeMap, BTreeSet};

use crate::refresh::types::ConnectionSpec;

/// The two ordered partitions of one refresh's update work
#[derive(Debug, Default)]
pub struct WavePlan {
    /// One connection per plugin: the exemplar, materialised first.
    pub initial: BTreeMap<String, ConnectionSpec>,
    /// Everything else, eligible for the clone fast-path.
    pub remaining: BTreeMap<String, ConnectionSpec>,
}

/// Effective search path: the user-configured override followed by the
/// remaining declared connections in alphabetical order.
pub fn effective_search_path(
    override_path: &[String],
    declared: &BTreeMap<String, ConnectionSpec>,
) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for entry in override_path {
        if seen.insert(entry.as_str()) {
            path.push(entry.clone());
        }
    }
    for name in declared.keys() {
        if seen.insert(name.as_str()) {
            path.push(name.clone());
        }
    }

    path
}

/// Picks each plugin's exemplar: the first connection of that plugin in the
/// effective search path, falling back to the lexicographically-smallest
/// declared connection for plugins absent from the path.
pub fn exemplar_connections(
    declared: &BTreeMap<String, ConnectionSpec>,
    search_path: &[String],
) -> BTreeMap<String, String> {
    let mut exemplars: BTreeMap<String, String> = BTreeMap::new();

    for name in search_path {
        if let Some(spec) = declared.get(name) {
            exemplars
                .entry(spec.plugin.clone())
                .or_insert_with(|| name.clone());
        }
    }

    // Declared iteration is name-ordered, so the fallback picks the
    // lexicographically-smallest connection.
    for (name, spec) in declared {
        exemplars
            .entry(spec.plugin.clone())
            .or_insert_with(|| name.clone());
    }

    exemplars
}

/// Splits validated updates into the exemplar wave and the remainder wave.
pub fn plan_waves(
    validated: &BTreeMap<String, ConnectionSpec>,
    declared: &BTreeMap<String, ConnectionSpec>,
    search_path: &[String],
) -> WavePlan {
    let exemplars = exemplar_connections(declared, search_path);
    let exemplar_names: BTreeSet<&String> = exemplars.values().collect();

    let mut plan = WavePlan::default();
    for (name, spec) in validated {
        if exemplar_names.contains(name) {
            plan.initial.insert(name.clone(), spec.clone());
        } else {
            plan.remaining.insert(name.clone(), spec.clone());
        }
    }

    plan
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

    fn declared(specs: &[ConnectionSpec]) -> BTreeMap<String, ConnectionSpec> {
        specs.iter().map(|s| (s.name.clone(), s.clone())).collect()
    }

    #[test]
    fn test_effective_search_path_override_first() {
        let declared = declared(&[
            spec("aws1", "aws"),
            spec("aws2", "aws"),
            spec("gcp1", "gcp"),
        ]);
        let path = effective_search_path(&["gcp1".to_string(), "public".to_string()], &declared);
        assert_eq!(path, vec!["gcp1", "public", "aws1", "aws2"]);
    }

    #[test]
    fn test_cold_start_exemplars_and_waves() {
        // Declared {aws1: aws, aws2: aws, gcp1: gcp}, search path
        // aws1,gcp1,aws2: exemplars are aws1 and gcp1, remainder is aws2.
        let declared = declared(&[
            spec("aws1", "aws"),
            spec("aws2", "aws"),
            spec("gcp1", "gcp"),
        ]);
        let search_path = vec![
            "aws1".to_string(),
            "gcp1".to_string(),
            "aws2".to_string(),
        ];

        let exemplars = exemplar_connections(&declared, &search_path);
        assert_eq!(exemplars.get("aws"), Some(&"aws1".to_string()));
        assert_eq!(exemplars.get("gcp"), Some(&"gcp1".to_string()));

        let plan = plan_waves(&declared, &declared, &search_path);
        let initial: Vec<&String> = plan.initial.keys().collect();
        let remaining: Vec<&String> = plan.remaining.keys().collect();
        assert_eq!(initial, vec!["aws1", "gcp1"]);
        assert_eq!(remaining, vec!["aws2"]);
    }

    #[test]
    fn test_exemplar_prefers_search_path_priority() {
        let declared = declared(&[spec("aws1", "aws"), spec("aws2", "aws")]);
        // The user put aws2 ahead of aws1.
        let search_path = vec!["aws2".to_string(), "aws1".to_string()];
        let exemplars = exemplar_connections(&declared, &search_path);
        assert_eq!(exemplars.get("aws"), Some(&"aws2".to_string()));
    }

    #[test]
    fn test_exemplar_fallback_lexicographic() {
        let declared = declared(&[spec("bbb", "aws"), spec("aaa", "aws")]);
        let exemplars = exemplar_connections(&declared, &[]);
        assert_eq!(exemplars.get("aws"), Some(&"aaa".to_string()));
    }

    #[test]
    fn test_plan_waves_only_covers_validated() {
        // aws1 is the exemplar but needs no update; only aws2 is in the
        // validated set and it lands in the remainder wave.
        let all = declared(&[spec("aws1", "aws"), spec("aws2", "aws")]);
        let validated = declared(&[spec("aws2", "aws")]);
        let search_path = vec!["aws1".to_string(), "aws2".to_string()];

        let plan = plan_waves(&validated, &all, &search_path);
        assert!(plan.initial.is_empty());
        assert_eq!(plan.remaining.len(), 1);
        assert!(plan.remaining.contains_key("aws2"));
    }
}
