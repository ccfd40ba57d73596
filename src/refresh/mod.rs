// Connection Refresh Engine
// Reconciles declared connections with the live state of the embedded
// Postgres: foreign schemas, the connection_state ledger and the on-disk
// snapshot.

pub mod clone;
pub mod comments;
pub mod diff;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod notifier;
pub mod orchestrator;
pub mod planner;
pub mod snapshot;
pub mod sql;
pub mod types;
pub mod validate;

pub use error::{RefreshError, RefreshResult};
pub use orchestrator::{RefreshOrchestrator, RefreshPhase};
pub use types::*;
