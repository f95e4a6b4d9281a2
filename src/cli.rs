//! Command-line interface parsing for mediacache
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into a [`CacheConfig`].

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::config::{CacheConfig, WriteMode};

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The eviction ratio must be a fraction of the ceiling
    #[error("Invalid eviction ratio: {0}. Expected a value in (0, 1]")]
    InvalidEvictionRatio(f64),

    /// A store name must be usable as a directory name
    #[error("Invalid store name: '{0}'")]
    InvalidStoreName(String),
}

/// mediacache - local cache for HLS and progressive media responses
#[derive(Parser, Debug)]
#[command(name = "mediacache")]
#[command(about = "Cache HLS manifests, segments and progressive media locally")]
#[command(version)]
pub struct Cli {
    /// Directory that holds the cache stores
    #[arg(long, env = "MEDIACACHE_DIR", value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Name of the live store generation; other generations are deleted on start
    #[arg(long, env = "MEDIACACHE_STORE", value_name = "NAME", global = true)]
    pub store: Option<String>,

    /// Size ceiling in bytes before eviction starts
    #[arg(long, value_name = "BYTES", global = true)]
    pub max_size: Option<u64>,

    /// Fraction of the ceiling that eviction brings the total down to
    #[arg(long, value_name = "RATIO", global = true)]
    pub eviction_ratio: Option<f64>,

    /// How bodies are written to disk
    #[arg(long, value_enum, default_value_t = WriteModeArg::Streamed, global = true)]
    pub write_mode: WriteModeArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a URL through the cache
    ///
    /// Examples:
    ///   mediacache fetch https://cdn.example.com/v/1/index.m3u8
    ///   mediacache fetch https://cdn.example.com/v/1/seg-001.ts -o seg.ts
    Fetch {
        /// URL to request
        url: String,
        /// Write the body to this file instead of discarding it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Report total cached size and entry count
    Size,
    /// Delete every cached entry
    Clear,
    /// Delete the entries belonging to one video
    ClearVideo {
        /// Manifest or media URL of the video
        url: String,
    },
    /// List cached URLs
    Keys,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteModeArg {
    Streamed,
    Buffered,
}

impl From<WriteModeArg> for WriteMode {
    fn from(arg: WriteModeArg) -> Self {
        match arg {
            WriteModeArg::Streamed => WriteMode::Streamed,
            WriteModeArg::Buffered => WriteMode::Buffered,
        }
    }
}

impl Cli {
    /// Builds the cache configuration, starting from defaults
    ///
    /// # Returns
    /// * `Ok(CacheConfig)` with CLI overrides applied
    /// * `Err(CliError)` if an override is out of range
    pub fn to_config(&self) -> Result<CacheConfig, CliError> {
        let mut config = CacheConfig::default();

        if let Some(dir) = &self.cache_dir {
            config.root = dir.clone();
        }
        if let Some(name) = &self.store {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(CliError::InvalidStoreName(name.clone()));
            }
            config.store_name = name.clone();
        }
        if let Some(max) = self.max_size {
            config.max_size = max;
        }
        if let Some(ratio) = self.eviction_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(CliError::InvalidEvictionRatio(ratio));
            }
            config.eviction_ratio = ratio;
        }
        config.write_mode = self.write_mode.into();

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::parse_from(["mediacache", "fetch", "https://cdn/a/seg1.ts"]);
        assert_eq!(
            cli.command,
            Command::Fetch {
                url: "https://cdn/a/seg1.ts".to_string(),
                output: None
            }
        );
    }

    #[test]
    fn test_cli_parse_fetch_with_output() {
        let cli = Cli::parse_from(["mediacache", "fetch", "https://cdn/a/seg1.ts", "-o", "x.ts"]);
        match cli.command {
            Command::Fetch { output, .. } => assert_eq!(output, Some(PathBuf::from("x.ts"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_clear_video() {
        let cli = Cli::parse_from(["mediacache", "clear-video", "https://cdn/a/video.m3u8"]);
        assert_eq!(
            cli.command,
            Command::ClearVideo {
                url: "https://cdn/a/video.m3u8".to_string()
            }
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["mediacache", "size", "--json", "--cache-dir", "/tmp/mc"]);
        assert!(cli.json);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/mc")));
        assert_eq!(cli.command, Command::Size);
    }

    #[test]
    fn test_to_config_defaults() {
        let cli = Cli::parse_from(["mediacache", "size"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.max_size, 52_428_800);
        assert_eq!(config.write_mode, WriteMode::Streamed);
    }

    #[test]
    fn test_to_config_overrides() {
        let cli = Cli::parse_from([
            "mediacache",
            "keys",
            "--store",
            "media-cache-v2",
            "--max-size",
            "1000",
            "--eviction-ratio",
            "0.5",
            "--write-mode",
            "buffered",
        ]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.store_name, "media-cache-v2");
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.eviction_target(), 500);
        assert_eq!(config.write_mode, WriteMode::Buffered);
    }

    #[test]
    fn test_to_config_rejects_bad_ratio() {
        let cli = Cli::parse_from(["mediacache", "size", "--eviction-ratio", "1.5"]);
        let err = cli.to_config().unwrap_err();
        assert!(err.to_string().contains("Invalid eviction ratio"));
    }

    #[test]
    fn test_to_config_rejects_path_like_store_name() {
        let cli = Cli::parse_from(["mediacache", "size", "--store", "../escape"]);
        assert!(cli.to_config().is_err());
    }
}
