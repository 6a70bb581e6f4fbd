//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Strata server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "strata-server", about = "Strata voxel world server")]
pub struct CliArgs {
    /// World directory holding the chunk files.
    #[arg(long)]
    pub world_path: Option<PathBuf>,

    /// Radius in chunks loaded around a viewer.
    #[arg(long)]
    pub view_radius: Option<i32>,

    /// Resident chunk limit (0 = unbounded).
    #[arg(long)]
    pub cache_max_chunks: Option<usize>,

    /// Milliseconds between world ticks.
    #[arg(long)]
    pub tick_interval_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref path) = args.world_path {
            self.world.path = path.clone();
        }
        if let Some(radius) = args.view_radius {
            self.world.view_radius = radius;
        }
        if let Some(max) = args.cache_max_chunks {
            self.world.cache_max_chunks = max;
        }
        if let Some(ms) = args.tick_interval_ms {
            self.shard.tick_interval_ms = ms;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            world_path: Some(PathBuf::from("/data/world")),
            cache_max_chunks: Some(512),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.world.path, PathBuf::from("/data/world"));
        assert_eq!(config.world.cache_max_chunks, 512);
        // Non-overridden fields retain defaults
        assert_eq!(config.world.view_radius, 10);
        assert_eq!(config.shard.tick_interval_ms, 50);
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "strata-server",
            "--view-radius",
            "6",
            "--tick-interval-ms",
            "25",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.view_radius, Some(6));
        assert_eq!(args.tick_interval_ms, Some(25));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.world_path.is_none());
    }
}
