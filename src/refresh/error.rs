// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the refresh engine
//!
//! Per-connection DDL failures never surface here; they are absorbed into the
//! connection ledger. These variants cover the orchestration-level failures
//! that abort a refresh.

use thiserror::Error;

/// Unified error type for refresh orchestration
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("invalid connection config: {message}")]
    Config { message: String },

    #[error("database error: {message}")]
    Database { message: String },

    #[error("failed to update connection ledger: {message}")]
    Ledger { message: String },

    #[error("failed to write connection state snapshot: {message}")]
    Snapshot { message: String },

    #[error("another refresh already holds the refresh lock")]
    RefreshInProgress,

    #[error("refresh cancelled")]
    Cancelled,
}

impl RefreshError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database { message: msg.into() }
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger { message: msg.into() }
    }

    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot { message: msg.into() }
    }
}

impl From<sqlx::Error> for RefreshError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

/// Result type alias for refresh operations
pub type RefreshResult<T> = Result<T, RefreshError>;
