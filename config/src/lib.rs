//! Configuration loading for the weft runtime.
//!
//! Two layers: `load_and_apply` merges `~/.config/weft/config.toml` (`[env]`
//! table) and a project `.env` into the process environment with priority
//! **existing env > .env > config.toml**, then [`RuntimeSettings::from_env`]
//! reads the typed knobs (database path, cycle intervals, breaker thresholds,
//! sandbox limits) the runtime is composed with.

mod dotenv;
mod runtime;
mod xdg_toml;

use std::path::Path;
use thiserror::Error;

pub use runtime::RuntimeSettings;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("config dir unavailable")]
    ConfigDir,
    #[error("read config.toml: {0}")]
    TomlRead(std::io::Error),
    #[error("parse config.toml: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Merges `config.toml` and `.env` values into the process environment.
///
/// Keys already present in the environment are never overwritten. For a key
/// missing from the environment the `.env` value wins over the config.toml
/// value. `app_name` selects `<config dir>/<app_name>/config.toml`;
/// `override_dir` replaces the current directory when looking for `.env`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let toml_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = toml_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        if let Some(v) = dotenv_map.get(&key).or_else(|| toml_map.get(&key)) {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}
