// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for plugin interactions
//!
//! Transport-specific failures are mapped to these unified variants so the
//! refresh engine can treat every plugin the same way.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for plugin operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum PluginError {
    #[error("plugin transport error: {message}")]
    Transport { message: String },

    #[error("plugin returned an invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("plugin startup failed: {message}")]
    StartupFailed { message: String },
}

impl PluginError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport { message: msg.into() }
    }

    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema { message: msg.into() }
    }

    pub fn startup_failed(msg: impl Into<String>) -> Self {
        Self::StartupFailed { message: msg.into() }
    }
}

/// Result type alias for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;
