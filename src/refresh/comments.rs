// SPDX-License-Identifier: Apache-2.0

//! Comment Writer
//!
//! Optional pass that writes `comment on` statements for every documented
//! table and column of each ready connection, from the schema metadata the
//! descriptor probe already collected. Each per-connection batch takes
//! `lock table pg_namespace` to serialise against system-catalogue
//! contention. Errors are logged and skipped.

use sqlx::postgres::PgPool;

use crate::plugin::types::PluginSchema;
use crate::refresh::ledger;
use crate::refresh::sql;
use tracing::instrument;

/// One connection's comment batch
#[derive(Debug, Clone)]
pub struct CommentTarget {
    pub connection: String,
    pub schema: PluginSchema,
}

/// Writer for table and column documentation comments
pub struct CommentWriter {
    pool: PgPool,
}

impl CommentWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes comments for every target. Failures never fail the refresh.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn write_all(&self, targets: &[CommentTarget]) {
        for target in targets {
            if let Err(message) = self.write_connection(target).await {
                tracing::warn!(
                    connection = %target.connection,
                    error = %message,
                    "failed to write schema comments"
                );
            }
        }
    }

    async fn write_connection(&self, target: &CommentTarget) -> Result<(), String> {
        let statements = sql::comment_statements(&target.connection, &target.schema);
        if statements.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;

        // Serialises comment batches against other catalogue DDL.
        sqlx::query("lock table pg_namespace")
            .execute(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;

        for statement in &statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.to_string())?;
        }

        ledger::set_comments_set(&mut tx, &target.connection)
            .await
            .map_err(|e| e.to_string())?;

        tx.commit().await.map_err(|e| e.to_string())
    }
}
