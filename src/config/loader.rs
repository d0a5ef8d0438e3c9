// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// the semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it:
///
/// - backends: at least one, unique names, known kinds, `slots >= 1`
/// - checkpoint: `block_size >= 1`, known policy, `interval >= 1`
/// - pins point at declared backends
/// - workload tasks use declared core elements and well-formed parameters
/// - durations parse
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Config used when `--config` is absent: `FLOWDAG_CONFIG` if set, else
/// `Flowdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("FLOWDAG_CONFIG")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Flowdag.toml"))
}
