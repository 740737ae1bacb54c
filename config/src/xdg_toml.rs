//! Load the `[env]` table from `<config dir>/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    // XDG_CONFIG_HOME wins when set so tests and containers can redirect it.
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .ok_or(LoadError::ConfigDir)?;
    let path = base.join(app_name).join("config.toml");
    Ok(path.is_file().then_some(path))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns the `[env]` table as a map. Missing file or missing section yields
/// an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = config_path(app_name)? else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::TomlRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}
