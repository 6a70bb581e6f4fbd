//! Runtime configuration for the Strata world server.
//!
//! Settings persist to disk as a RON file and can be overridden per run from
//! the command line. Every section defaults independently, so older config
//! files keep loading as new settings are added.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, Config, DebugConfig, ShardConfig, WorldConfig};
pub use error::ConfigError;
