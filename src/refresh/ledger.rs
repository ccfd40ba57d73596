// SPDX-License-Identifier: Apache-2.0

//! Ledger Store
//!
//! Owns the `connection_state` table and every single-row state transition.
//! Mutations run against a caller-provided connection so that DDL and ledger
//! change commit in the same transaction. The table is the authoritative
//! record of connection state; the on-disk snapshot is a derived cache.

use std::collections::BTreeMap;

use sqlx::postgres::{PgConnection, PgPool, Postgres};
use sqlx::Transaction;

use crate::plugin::types::PluginDescriptor;
use crate::refresh::error::{RefreshError, RefreshResult};
use crate::refresh::sql::INTERNAL_SCHEMA;
use crate::refresh::types::{ConnectionSpec, ConnectionState, ConnectionUpdates, LedgerRow};

/// Current ledger table schema version. Version 1 is the base table;
/// version 2 added the `connection_hash` column.
const LEDGER_SCHEMA_VERSION: i32 = 2;

/// Store for the `connection_state` ledger table
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the internal schema and ledger table if absent and applies
    /// forward-only migrations, gated on the stored schema version.
    pub async fn ensure(&self) -> RefreshResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("create schema if not exists {INTERNAL_SCHEMA}"))
            .execute(&mut *tx)
            .await?;

        sqlx::query(&format!(
            "create table if not exists {INTERNAL_SCHEMA}.connection_state (
                name text primary key,
                state text not null,
                type text,
                connection_mod_time timestamptz,
                plugin text,
                plugin_instance text,
                schema_mode text,
                schema_hash text,
                comments_set bool,
                error text,
                state_reason text,
                file_name text,
                start_line_number int,
                end_line_number int
            )"
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "create table if not exists {INTERNAL_SCHEMA}.connection_state_version (
                id int primary key default 1,
                version int not null
            )"
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "insert into {INTERNAL_SCHEMA}.connection_state_version (id, version)
             values (1, 1)
             on conflict (id) do nothing"
        ))
        .execute(&mut *tx)
        .await?;

        let version: i32 = sqlx::query_scalar(&format!(
            "select version from {INTERNAL_SCHEMA}.connection_state_version where id = 1"
        ))
        .fetch_one(&mut *tx)
        .await?;

        if version < 2 {
            tracing::info!(from = version, to = 2, "migrating connection_state table");
            sqlx::query(&format!(
                "alter table {INTERNAL_SCHEMA}.connection_state
                 add column if not exists connection_hash text"
            ))
            .execute(&mut *tx)
            .await?;
        }

        if version < LEDGER_SCHEMA_VERSION {
            sqlx::query(&format!(
                "update {INTERNAL_SCHEMA}.connection_state_version set version = $1 where id = 1"
            ))
            .bind(LEDGER_SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Loads the full ledger, keyed by connection name.
    pub async fn load(&self) -> RefreshResult<BTreeMap<String, LedgerRow>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "select name, state, type, connection_mod_time, plugin, plugin_instance,
                    schema_mode, schema_hash, comments_set, error, state_reason,
                    file_name, start_line_number, end_line_number, connection_hash
             from {INTERNAL_SCHEMA}.connection_state"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.name.clone(), row)).collect())
    }

    /// Begins a transaction on the ledger's pool.
    pub async fn begin(&self) -> RefreshResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Synchronises the ledger with a freshly-computed update set, in one
    /// transaction: creates are inserted and moved to `updating`, updates are
    /// set to `updating`, deletions to `deleting`. Target hashes are written
    /// here so an interrupted refresh can be diffed against intent.
    pub async fn begin_refresh(
        &self,
        updates: &ConnectionUpdates,
        descriptors: &BTreeMap<String, PluginDescriptor>,
    ) -> RefreshResult<()> {
        let mut tx = self.pool.begin().await.map_err(to_ledger_error)?;

        for (name, spec) in &updates.create {
            upsert_connection(
                &mut *tx,
                spec,
                descriptors.get(&spec.plugin),
                ConnectionState::PendingIncomplete,
            )
            .await?;
            set_state(&mut *tx, name, ConnectionState::Updating, None).await?;
        }

        for spec in updates.update.values() {
            upsert_connection(
                &mut *tx,
                spec,
                descriptors.get(&spec.plugin),
                ConnectionState::Updating,
            )
            .await?;
        }

        for name in &updates.delete {
            set_state(&mut *tx, name, ConnectionState::Deleting, None).await?;
        }

        tx.commit().await.map_err(to_ledger_error)
    }

    /// Sets every ledger row to `error` with the given reason, in a single
    /// statement so there is no partial-update window. Used for
    /// catastrophic-error fan-out.
    pub async fn set_all_error(&self, message: &str) -> RefreshResult<()> {
        sqlx::query(&format!(
            "update {INTERNAL_SCHEMA}.connection_state
             set state = 'error', error = $1, state_reason = 'refresh aborted',
                 connection_mod_time = now()"
        ))
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(to_ledger_error)?;
        Ok(())
    }
}

fn to_ledger_error(err: sqlx::Error) -> RefreshError {
    RefreshError::ledger(err.to_string())
}

async fn upsert_connection(
    conn: &mut PgConnection,
    spec: &ConnectionSpec,
    descriptor: Option<&PluginDescriptor>,
    state: ConnectionState,
) -> RefreshResult<()> {
    let schema_mode = descriptor.map(|d| d.schema_mode.as_str());
    let schema_hash = descriptor.and_then(|d| d.schema_hash.clone());

    sqlx::query(&format!(
        "insert into {INTERNAL_SCHEMA}.connection_state
            (name, state, connection_mod_time, plugin, plugin_instance, schema_mode,
             schema_hash, comments_set, error, state_reason, file_name,
             start_line_number, end_line_number, connection_hash)
         values ($1, $2, now(), $3, $4, $5, $6, false, null, null, $7, $8, $9, $10)
         on conflict (name) do update set
            state = excluded.state,
            connection_mod_time = excluded.connection_mod_time,
            plugin = excluded.plugin,
            plugin_instance = excluded.plugin_instance,
            schema_mode = excluded.schema_mode,
            schema_hash = excluded.schema_hash,
            error = null,
            state_reason = null,
            file_name = excluded.file_name,
            start_line_number = excluded.start_line_number,
            end_line_number = excluded.end_line_number,
            connection_hash = excluded.connection_hash"
    ))
    .bind(&spec.name)
    .bind(state.as_str())
    .bind(&spec.plugin)
    .bind(&spec.plugin_instance)
    .bind(schema_mode)
    .bind(schema_hash)
    .bind(&spec.file_name)
    .bind(spec.start_line_number)
    .bind(spec.end_line_number)
    .bind(spec.config_hash())
    .execute(conn)
    .await
    .map_err(to_ledger_error)?;

    Ok(())
}

/// Sets a connection's state, optionally with a reason.
pub async fn set_state(
    conn: &mut PgConnection,
    name: &str,
    state: ConnectionState,
    reason: Option<&str>,
) -> RefreshResult<()> {
    sqlx::query(&format!(
        "update {INTERNAL_SCHEMA}.connection_state
         set state = $2, state_reason = $3, connection_mod_time = now()
         where name = $1"
    ))
    .bind(name)
    .bind(state.as_str())
    .bind(reason)
    .execute(conn)
    .await
    .map_err(to_ledger_error)?;
    Ok(())
}

/// Records a per-connection failure in the ledger.
pub async fn set_error(conn: &mut PgConnection, name: &str, message: &str) -> RefreshResult<()> {
    sqlx::query(&format!(
        "update {INTERNAL_SCHEMA}.connection_state
         set state = 'error', error = $2, connection_mod_time = now()
         where name = $1"
    ))
    .bind(name)
    .bind(message)
    .execute(conn)
    .await
    .map_err(to_ledger_error)?;
    Ok(())
}

/// Marks a connection ready, recording the hashes its schema was built from.
pub async fn set_ready(
    conn: &mut PgConnection,
    name: &str,
    plugin_schema_hash: Option<&str>,
    connection_hash: &str,
) -> RefreshResult<()> {
    sqlx::query(&format!(
        "update {INTERNAL_SCHEMA}.connection_state
         set state = 'ready', error = null, state_reason = null,
             schema_hash = $2, connection_hash = $3, connection_mod_time = now()
         where name = $1"
    ))
    .bind(name)
    .bind(plugin_schema_hash)
    .bind(connection_hash)
    .execute(conn)
    .await
    .map_err(to_ledger_error)?;
    Ok(())
}

/// Marks a connection's comments as written.
pub async fn set_comments_set(conn: &mut PgConnection, name: &str) -> RefreshResult<()> {
    sqlx::query(&format!(
        "update {INTERNAL_SCHEMA}.connection_state set comments_set = true where name = $1"
    ))
    .bind(name)
    .execute(conn)
    .await
    .map_err(to_ledger_error)?;
    Ok(())
}

/// Removes a connection's ledger row after its schema has been dropped.
pub async fn delete(conn: &mut PgConnection, name: &str) -> RefreshResult<()> {
    sqlx::query(&format!(
        "delete from {INTERNAL_SCHEMA}.connection_state where name = $1"
    ))
    .bind(name)
    .execute(conn)
    .await
    .map_err(to_ledger_error)?;
    Ok(())
}
