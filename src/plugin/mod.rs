// Plugin capability layer
// Everything the engine knows about a plugin comes through this module.

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;

pub use descriptor::PluginDescriptorCache;
pub use error::PluginError;
pub use registry::PluginRegistry;
pub use traits::{PluginClient, PluginProvider};
pub use types::*;
