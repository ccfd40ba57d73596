// datafab - SQL-queryable data-fabric control plane
// Core library: the connection refresh engine

pub mod observability;
pub mod plugin;
pub mod refresh;

pub use plugin::{PluginClient, PluginProvider, PluginRegistry};
pub use refresh::{RefreshOptions, RefreshOrchestrator, RefreshOutcome, RefreshPhase};
