// SPDX-License-Identifier: Apache-2.0

//! Schema-change notifications
//!
//! After the exemplar wave commits, a single NOTIFY is published so attached
//! interactive clients can refresh their inspect data and autocomplete
//! mid-run. Delivery failure is logged and swallowed; clients recover on
//! their next poll.

use sqlx::postgres::PgPool;

use crate::refresh::error::{RefreshError, RefreshResult};
use crate::refresh::sql::NOTIFY_CHANNEL;
use crate::refresh::types::SchemaUpdateNotification;

/// Publisher for the schema-change channel
pub struct SchemaNotifier {
    pool: PgPool,
}

impl SchemaNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Publishes the notification payload. Callers treat errors as
    /// non-fatal.
    pub async fn send(&self, notification: &SchemaUpdateNotification) -> RefreshResult<()> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| RefreshError::database(e.to_string()))?;

        sqlx::query("select pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(&payload)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            updated = notification.updated.len(),
            deleted = notification.deleted.len(),
            "schema update notification sent"
        );
        Ok(())
    }
}
