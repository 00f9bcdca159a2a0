//! Configuration error types

use std::path::PathBuf;

use snafu::Snafu;

/// Configuration loading and validation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    /// A value is out of range.
    #[snafu(display("invalid configuration for {key}: {reason}"))]
    Validation { key: &'static str, reason: String },
}
