//! Configuration types, defaults, and loading
//!
//! The policy file is deserialized into [`Config`], overlaid onto the
//! documented defaults by [`merge_with_defaults`] (zero and empty values
//! count as unset), and then validated. Compilation only ever sees merged,
//! validated configurations.

pub mod loader;
pub mod merge;
pub mod types;

pub use loader::{load_config, load_config_str};
pub use merge::merge_with_defaults;
pub use types::{Config, DnsConfig, OwnerConfig, RedirectConfig, TrafficFlowConfig};
