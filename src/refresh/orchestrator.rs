// SPDX-License-Identifier: Apache-2.0

//! Refresh orchestrator
//!
//! Drives one refresh as an explicit state machine:
//! Idle -> Probing -> Diffing -> Validating -> Deleting -> ExemplarUpdating
//! -> Notifying -> RemainderUpdating -> Commenting -> Persisting -> Idle.
//!
//! Waves run sequentially; within a wave, units run concurrently up to the
//! executor bound. Per-connection DDL failures are absorbed into the ledger;
//! only ledger-write and snapshot-write failures abort the refresh, entering
//! the terminal `Aborted` state and fanning the error out to every ledger
//! row. A refresh is bounded by a Postgres advisory lock held on a dedicated
//! connection; the engine is the ledger's sole writer while it runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use sqlx::postgres::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::plugin::descriptor::{PluginDescriptorCache, ProbeTarget};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::types::{PluginDescriptor, SchemaMode};
use crate::refresh::clone::{plan_remainder_unit, CloneEngine};
use crate::refresh::comments::{CommentTarget, CommentWriter};
use crate::refresh::diff::build_connection_updates;
use crate::refresh::error::{RefreshError, RefreshResult};
use crate::refresh::executor::{DdlExecutor, LedgerTransition, WorkOutcome, WorkResult, WorkUnit};
use crate::refresh::ledger::{self, LedgerStore};
use crate::refresh::notifier::SchemaNotifier;
use crate::refresh::planner::{effective_search_path, plan_waves};
use crate::refresh::snapshot::SnapshotStore;
use crate::refresh::sql::{self, FDW_SERVER, REFRESH_LOCK_KEY};
use crate::refresh::types::{
    ConnectionSpec, RefreshOptions, RefreshOutcome, SchemaUpdateNotification,
};
use crate::refresh::validate::{
    build_missing_plugin_warning, build_validation_warning, validate_updates,
};

/// Orchestrator states; `Aborted` is terminal for the run that entered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Probing,
    Diffing,
    Validating,
    Deleting,
    ExemplarUpdating,
    Notifying,
    RemainderUpdating,
    Commenting,
    Persisting,
    Aborted,
}

/// Top-level refresh engine
pub struct RefreshOrchestrator {
    pool: PgPool,
    descriptors: PluginDescriptorCache,
    ledger: LedgerStore,
    snapshot: SnapshotStore,
    executor: DdlExecutor,
    notifier: SchemaNotifier,
    comment_writer: CommentWriter,
    clone_engine: CloneEngine,
    search_path_override: Vec<String>,
    options: RefreshOptions,
    phase: Mutex<RefreshPhase>,
}

impl RefreshOrchestrator {
    /// `search_path_override` is the user-configured search path prefix,
    /// loaded by the caller before refreshing.
    pub fn new(
        pool: PgPool,
        registry: Arc<PluginRegistry>,
        install_dir: impl AsRef<Path>,
        search_path_override: Vec<String>,
        options: RefreshOptions,
    ) -> Self {
        let concurrency = options
            .pool_size
            .unwrap_or_else(DdlExecutor::default_concurrency);

        Self {
            descriptors: PluginDescriptorCache::new(registry),
            ledger: LedgerStore::new(pool.clone()),
            snapshot: SnapshotStore::new(install_dir),
            executor: DdlExecutor::new(pool.clone(), concurrency),
            notifier: SchemaNotifier::new(pool.clone()),
            comment_writer: CommentWriter::new(pool.clone()),
            clone_engine: CloneEngine::new(),
            search_path_override,
            options,
            phase: Mutex::new(RefreshPhase::Idle),
            pool,
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.phase.lock().unwrap()
    }

    fn enter_phase(&self, next: RefreshPhase) {
        let mut phase = self.phase.lock().unwrap();
        tracing::debug!(from = ?*phase, to = ?next, "refresh phase transition");
        *phase = next;
    }

    /// Reconciles the declared connection set with the live database state.
    /// Always terminates with a single outcome object; a non-empty
    /// `failed_connections` is not a process-level failure.
    #[instrument(skip(self, declared, cancel), fields(declared = declared.len()))]
    pub async fn refresh(
        &self,
        declared: &BTreeMap<String, ConnectionSpec>,
        cancel: &CancellationToken,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::new();

        // The advisory lock lives on a dedicated connection so that it is
        // held for exactly the refresh lifetime.
        let mut lock_conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                self.enter_phase(RefreshPhase::Aborted);
                outcome.fatal_error = Some(RefreshError::from(e).to_string());
                return outcome;
            }
        };

        let locked: Result<bool, sqlx::Error> =
            sqlx::query_scalar("select pg_try_advisory_lock($1)")
                .bind(REFRESH_LOCK_KEY)
                .fetch_one(&mut *lock_conn)
                .await;
        match locked {
            Ok(true) => {}
            Ok(false) => {
                self.enter_phase(RefreshPhase::Aborted);
                outcome.fatal_error = Some(RefreshError::RefreshInProgress.to_string());
                return outcome;
            }
            Err(e) => {
                self.enter_phase(RefreshPhase::Aborted);
                outcome.fatal_error = Some(RefreshError::from(e).to_string());
                return outcome;
            }
        }

        match self.run_refresh(declared, cancel, &mut outcome).await {
            Ok(()) => self.enter_phase(RefreshPhase::Idle),
            Err(RefreshError::Cancelled) => {
                // Mid-flight rows are reconciled by the next refresh; no
                // ledger fan-out, the cancellation may originate there.
                self.enter_phase(RefreshPhase::Aborted);
                outcome.fatal_error = Some(RefreshError::Cancelled.to_string());
            }
            Err(err) => {
                self.enter_phase(RefreshPhase::Aborted);
                let message = err.to_string();
                tracing::error!(error = %message, "refresh aborted");
                if let Err(fan_err) = self.ledger.set_all_error(&message).await {
                    tracing::warn!(error = %fan_err, "failed to fan refresh error out to ledger");
                }
                outcome.fatal_error = Some(message);
            }
        }

        let unlocked: Result<bool, sqlx::Error> = sqlx::query_scalar("select pg_advisory_unlock($1)")
            .bind(REFRESH_LOCK_KEY)
            .fetch_one(&mut *lock_conn)
            .await;
        if let Err(e) = unlocked {
            tracing::warn!(error = %e, "failed to release refresh advisory lock");
        }

        outcome
    }

    async fn run_refresh(
        &self,
        declared: &BTreeMap<String, ConnectionSpec>,
        cancel: &CancellationToken,
        outcome: &mut RefreshOutcome,
    ) -> RefreshResult<()> {
        validate_declared(declared)?;

        self.ledger.ensure().await?;

        // Absence of the snapshot marks an in-flight (or crashed) refresh.
        self.snapshot.delete();

        let ledger_rows = self.ledger.load().await?;
        let live_schemas = self.load_foreign_schemas().await?;

        // Recovery reconciliation: ready rows whose schema vanished must be
        // re-imported; schemas with no ledger row are orphans to drop.
        let mut force_update: BTreeSet<String> =
            self.options.force_update.iter().cloned().collect();
        for (name, row) in &ledger_rows {
            if row.is_ready() && declared.contains_key(name) && !live_schemas.contains(name) {
                tracing::info!(connection = %name, "ready connection has no schema, re-importing");
                force_update.insert(name.clone());
            }
        }
        let orphan_schemas: Vec<String> = live_schemas
            .iter()
            .filter(|schema| !ledger_rows.contains_key(*schema))
            .cloned()
            .collect();

        self.enter_phase(RefreshPhase::Probing);
        let targets = probe_targets(declared);
        let descriptors = self.descriptors.describe_all(&targets).await;
        check_cancelled(cancel)?;

        self.enter_phase(RefreshPhase::Diffing);
        let mut updates =
            build_connection_updates(declared, &ledger_rows, &descriptors, &force_update);
        for orphan in orphan_schemas {
            tracing::info!(schema = %orphan, "dropping orphaned foreign schema");
            updates.delete.insert(orphan);
        }

        if let Some(warning) = build_missing_plugin_warning(&updates.missing_plugins) {
            outcome.add_warning(warning);
        }

        // Sync the ledger to the planned work before any DDL runs.
        self.ledger.begin_refresh(&updates, &descriptors).await?;

        if !updates.has_updates() {
            tracing::info!("refresh: no updates required");
            return self.persist(declared).await;
        }

        self.enter_phase(RefreshPhase::Validating);
        let upserts = updates.upserts();
        let (validated, failures) = validate_updates(&upserts, &descriptors, &ledger_rows);
        if let Some(warning) = build_validation_warning(&failures) {
            outcome.add_warning(warning);
        }
        for failure in &failures {
            let mut conn = self.pool.acquire().await?;
            ledger::set_error(&mut conn, &failure.connection_name, &failure.message).await?;
        }
        check_cancelled(cancel)?;

        // All deletions commit before any update begins: a delete followed
        // by a create with the same name must not interleave.
        self.enter_phase(RefreshPhase::Deleting);
        let delete_units: Vec<WorkUnit> = updates
            .delete
            .iter()
            .map(|name| WorkUnit {
                connection: name.clone(),
                statements: vec![sql::delete_connection_statement(name)],
                fallback_statements: None,
                transition: LedgerTransition::Delete,
            })
            .collect();
        let delete_results = self.executor.run_wave(delete_units, cancel).await;
        let deleted = fold_wave_results(&delete_results, outcome)?;

        let search_path = effective_search_path(&self.search_path_override, declared);
        let plan = plan_waves(&validated, declared, &search_path);

        self.enter_phase(RefreshPhase::ExemplarUpdating);
        let exemplar_units: Vec<WorkUnit> = plan
            .initial
            .values()
            .filter_map(|spec| {
                descriptors
                    .get(&spec.plugin)
                    .map(|descriptor| plan_import_unit(spec, descriptor))
            })
            .collect();
        let exemplar_results = self.executor.run_wave(exemplar_units, cancel).await;
        let exemplar_ready = fold_wave_results(&exemplar_results, outcome)?;

        for name in &exemplar_ready {
            let Some(spec) = declared.get(name) else { continue };
            if let Some(descriptor) = descriptors.get(&spec.plugin) {
                if descriptor.schema_mode == SchemaMode::Static {
                    self.clone_engine.record_exemplar(&spec.plugin, name).await;
                }
            }
        }

        // Attached clients refresh autocomplete off this notification; it
        // must land before the remainder wave starts.
        self.enter_phase(RefreshPhase::Notifying);
        if self.options.notify {
            let notification = SchemaUpdateNotification::new(exemplar_ready, deleted);
            if !notification.is_empty() {
                if let Err(err) = self.notifier.send(&notification).await {
                    tracing::warn!(error = %err, "failed to send schema update notification");
                }
            }
        }
        check_cancelled(cancel)?;

        self.enter_phase(RefreshPhase::RemainderUpdating);
        let exemplars = self.clone_engine.snapshot().await;
        let remainder_units: Vec<WorkUnit> = plan
            .remaining
            .values()
            .filter_map(|spec| {
                descriptors.get(&spec.plugin).map(|descriptor| {
                    plan_remainder_unit(
                        spec,
                        descriptor,
                        updates.clone_eligible.contains(&spec.name),
                        &exemplars,
                    )
                })
            })
            .collect();
        let remainder_results = self.executor.run_wave(remainder_units, cancel).await;
        fold_wave_results(&remainder_results, outcome)?;

        // Invalid connections keep their declared row but must not keep
        // serving a schema the host cannot support.
        for failure in failures.iter().filter(|f| f.should_drop_if_exists) {
            let statement = sql::delete_connection_statement(&failure.connection_name);
            if let Err(e) = sqlx::query(&statement).execute(&self.pool).await {
                tracing::warn!(
                    connection = %failure.connection_name,
                    error = %e,
                    "failed to drop schema for invalid connection"
                );
            }
        }

        self.enter_phase(RefreshPhase::Commenting);
        if self.options.schema_comments {
            let targets: Vec<CommentTarget> = validated
                .iter()
                .filter(|(name, _)| !outcome.failed_connections.contains_key(*name))
                .filter_map(|(name, spec)| {
                    let schema = descriptors.get(&spec.plugin).and_then(|d| d.schema.clone())?;
                    schema.has_comments().then(|| CommentTarget {
                        connection: name.clone(),
                        schema,
                    })
                })
                .collect();
            self.comment_writer.write_all(&targets).await;
        }

        outcome.updated_connections = true;
        self.persist(declared).await
    }

    /// Final state: rewrite the snapshot from the ledger and re-apply the
    /// effective search path so fresh schemas resolve unqualified names.
    async fn persist(&self, declared: &BTreeMap<String, ConnectionSpec>) -> RefreshResult<()> {
        self.enter_phase(RefreshPhase::Persisting);

        let rows = self.ledger.load().await?;
        self.snapshot.save(&rows)?;

        let search_path = effective_search_path(&self.search_path_override, declared);
        if !search_path.is_empty() {
            let quoted: Vec<String> = search_path.iter().map(|s| sql::quote_ident(s)).collect();
            let statement = format!(
                "alter role current_user set search_path to {}",
                quoted.join(", ")
            );
            if let Err(e) = sqlx::query(&statement).execute(&self.pool).await {
                tracing::warn!(error = %e, "failed to apply search path");
            }
        }

        Ok(())
    }

    async fn load_foreign_schemas(&self) -> RefreshResult<BTreeSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "select distinct foreign_table_schema::text
             from information_schema.foreign_tables
             where foreign_server_name = $1",
        )
        .bind(FDW_SERVER)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(schema,)| schema).collect())
    }
}

/// A plain full-import unit, used for every exemplar-wave connection.
fn plan_import_unit(spec: &ConnectionSpec, descriptor: &PluginDescriptor) -> WorkUnit {
    plan_remainder_unit(spec, descriptor, false, &std::collections::HashMap::new())
}

/// One probe per distinct plugin: its lexicographically-first declared
/// connection.
fn probe_targets(declared: &BTreeMap<String, ConnectionSpec>) -> Vec<ProbeTarget> {
    let mut targets: Vec<ProbeTarget> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for spec in declared.values() {
        if seen.insert(spec.plugin.as_str()) {
            targets.push(ProbeTarget {
                plugin: spec.plugin.clone(),
                connection_name: spec.name.clone(),
                config_blob: spec.config_blob.clone(),
            });
        }
    }
    targets
}

/// Rejects malformed declared connections before any DDL runs.
fn validate_declared(declared: &BTreeMap<String, ConnectionSpec>) -> RefreshResult<()> {
    for (key, spec) in declared {
        if key != &spec.name {
            return Err(RefreshError::config(format!(
                "connection map key '{key}' does not match connection name '{}'",
                spec.name
            )));
        }
        if spec.name.is_empty() || spec.name.len() > 63 {
            return Err(RefreshError::config(format!(
                "connection name '{}' must be between 1 and 63 characters",
                spec.name
            )));
        }
        if !spec
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            || spec.name.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(RefreshError::config(format!(
                "connection name '{}' is not a valid schema name",
                spec.name
            )));
        }
        if spec.plugin.is_empty() {
            return Err(RefreshError::config(format!(
                "connection '{}' declares no plugin",
                spec.name
            )));
        }
    }
    Ok(())
}

/// Folds one wave's results into the outcome. Returns the names that
/// succeeded, sorted for deterministic notification payloads.
fn fold_wave_results(
    results: &[WorkResult],
    outcome: &mut RefreshOutcome,
) -> RefreshResult<Vec<String>> {
    let mut succeeded = Vec::new();
    let mut fatal: Option<String> = None;
    let mut cancelled = false;

    for result in results {
        match &result.outcome {
            WorkOutcome::Succeeded { .. } => succeeded.push(result.connection.clone()),
            WorkOutcome::Failed { message } => {
                outcome.add_failed_connection(result.connection.clone(), message.clone());
            }
            WorkOutcome::Fatal { message } => {
                fatal = Some(match fatal.take() {
                    Some(existing) => format!("{existing}; {message}"),
                    None => message.clone(),
                });
            }
            WorkOutcome::Cancelled => cancelled = true,
        }
    }

    if let Some(message) = fatal {
        return Err(RefreshError::ledger(message));
    }
    if cancelled {
        return Err(RefreshError::Cancelled);
    }

    succeeded.sort();
    Ok(succeeded)
}

fn check_cancelled(cancel: &CancellationToken) -> RefreshResult<()> {
    if cancel.is_cancelled() {
        return Err(RefreshError::Cancelled);
    }
    Ok(())
}
