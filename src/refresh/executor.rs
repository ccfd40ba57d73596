// SPDX-License-Identifier: Apache-2.0

//! DDL Executor
//!
//! Runs one wave of schema DDL at a time. Each work unit is a transaction:
//! `BEGIN; <DDL>; <ledger transition>; COMMIT`. A DDL failure rolls back,
//! writes the connection's ledger row to `error` in a short follow-up
//! transaction and never aborts the wave; a ledger-write failure is fatal.
//! Concurrency within a wave is bounded by a counting semaphore shared with
//! the clone fast-path.

use std::sync::Arc;

use sqlx::postgres::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::refresh::ledger;
use crate::refresh::types::ConnectionState;

/// Ledger write performed inside a unit's transaction after its DDL
#[derive(Debug, Clone)]
pub enum LedgerTransition {
    /// Mark the connection ready, recording the hashes it was built from.
    Ready {
        plugin_schema_hash: Option<String>,
        connection_hash: String,
    },
    /// Mark the connection deleted and remove its row.
    Delete,
}

/// One unit of schema work
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub connection: String,
    pub statements: Vec<String>,
    /// Statements to retry with when the primary statements fail; used by
    /// the clone fast-path to fall back to a full import.
    pub fallback_statements: Option<Vec<String>>,
    pub transition: LedgerTransition,
}

/// Outcome of one unit, emitted by a worker and folded by the orchestrator
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    Succeeded { used_fallback: bool },
    /// DDL failed; the failure is recorded in the connection's ledger row.
    Failed { message: String },
    /// The ledger itself could not be written; aborts the refresh.
    Fatal { message: String },
    Cancelled,
}

/// Result message for one unit
#[derive(Debug)]
pub struct WorkResult {
    pub connection: String,
    pub outcome: WorkOutcome,
}

/// Executor for waves of schema DDL against one Postgres instance
pub struct DdlExecutor {
    pool: PgPool,
    semaphore: Arc<Semaphore>,
}

impl DdlExecutor {
    pub fn new(pool: PgPool, concurrency: u32) -> Self {
        Self {
            pool,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1) as usize)),
        }
    }

    /// Default concurrency bound for the executor's connection use.
    pub fn default_concurrency() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4)
            .max(4)
    }

    /// Runs one wave. Units execute concurrently up to the semaphore bound;
    /// no ordering is guaranteed between units within a wave. Returns one
    /// result per unit, including `Cancelled` results for units that never
    /// started.
    #[instrument(skip(self, units, cancel), fields(units = units.len()))]
    pub async fn run_wave(
        &self,
        units: Vec<WorkUnit>,
        cancel: &CancellationToken,
    ) -> Vec<WorkResult> {
        let expected = units.len();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        for unit in units {
            if cancel.is_cancelled() {
                let _ = result_tx.send(WorkResult {
                    connection: unit.connection,
                    outcome: WorkOutcome::Cancelled,
                });
                continue;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => None,
                permit = self.semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let _ = result_tx.send(WorkResult {
                    connection: unit.connection,
                    outcome: WorkOutcome::Cancelled,
                });
                continue;
            };

            let pool = self.pool.clone();
            let cancel = cancel.clone();
            let result_tx = result_tx.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => WorkOutcome::Cancelled,
                    outcome = execute_unit(&pool, &unit) => outcome,
                };
                let _ = result_tx.send(WorkResult {
                    connection: unit.connection,
                    outcome,
                });
                drop(permit);
            });
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(expected);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        results
    }
}

enum StatementsResult {
    Committed,
    DdlFailed(String),
    Fatal(String),
}

async fn execute_unit(pool: &PgPool, unit: &WorkUnit) -> WorkOutcome {
    match run_statements(pool, &unit.statements, &unit.transition, &unit.connection).await {
        StatementsResult::Committed => WorkOutcome::Succeeded {
            used_fallback: false,
        },
        StatementsResult::Fatal(message) => WorkOutcome::Fatal { message },
        StatementsResult::DdlFailed(message) => {
            if let Some(fallback) = &unit.fallback_statements {
                tracing::warn!(
                    connection = %unit.connection,
                    error = %message,
                    "clone failed, falling back to full schema import"
                );
                match run_statements(pool, fallback, &unit.transition, &unit.connection).await {
                    StatementsResult::Committed => WorkOutcome::Succeeded {
                        used_fallback: true,
                    },
                    StatementsResult::Fatal(message) => WorkOutcome::Fatal { message },
                    StatementsResult::DdlFailed(message) => {
                        record_connection_error(pool, &unit.connection, message).await
                    }
                }
            } else {
                record_connection_error(pool, &unit.connection, message).await
            }
        }
    }
}

/// Runs a unit's statements and ledger transition in one transaction.
async fn run_statements(
    pool: &PgPool,
    statements: &[String],
    transition: &LedgerTransition,
    connection: &str,
) -> StatementsResult {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            return StatementsResult::Fatal(format!(
                "failed to begin transaction for '{connection}': {e}"
            ))
        }
    };

    for statement in statements {
        if let Err(e) = sqlx::query(statement).execute(&mut *tx).await {
            // Dropping the transaction rolls it back.
            return StatementsResult::DdlFailed(e.to_string());
        }
    }

    let transition_result = match transition {
        LedgerTransition::Ready {
            plugin_schema_hash,
            connection_hash,
        } => {
            ledger::set_ready(
                &mut tx,
                connection,
                plugin_schema_hash.as_deref(),
                connection_hash,
            )
            .await
        }
        LedgerTransition::Delete => {
            match ledger::set_state(&mut tx, connection, ConnectionState::Deleted, None).await {
                Ok(()) => ledger::delete(&mut tx, connection).await,
                Err(e) => Err(e),
            }
        }
    };

    if let Err(e) = transition_result {
        return StatementsResult::Fatal(e.to_string());
    }

    match tx.commit().await {
        Ok(()) => StatementsResult::Committed,
        Err(e) => StatementsResult::Fatal(format!(
            "failed to commit transaction for '{connection}': {e}"
        )),
    }
}

/// Records a DDL failure in the connection's ledger row. Only a failure to
/// write the ledger itself escalates to fatal.
async fn record_connection_error(pool: &PgPool, connection: &str, message: String) -> WorkOutcome {
    tracing::warn!(connection = %connection, error = %message, "connection DDL failed");

    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            return WorkOutcome::Fatal {
                message: format!(
                    "failed to record error for '{connection}' in connection ledger: {e}"
                ),
            }
        }
    };

    match ledger::set_error(&mut conn, connection, &message).await {
        Ok(()) => WorkOutcome::Failed { message },
        Err(e) => WorkOutcome::Fatal {
            message: format!("failed to record error for '{connection}' in connection ledger: {e}"),
        },
    }
}
