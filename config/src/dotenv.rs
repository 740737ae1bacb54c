//! Parse a project `.env` into a key-value map. Application (env > .env >
//! config.toml) happens in `lib.rs`; this module never touches the process env.

use std::collections::HashMap;
use std::path::Path;

fn dotenv_path(override_dir: Option<&Path>) -> Option<std::path::PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Minimal `.env` parser.
///
/// * `KEY=VALUE` per line; keys and values are trimmed.
/// * An optional `export ` prefix before the key is accepted and stripped.
/// * Blank lines and lines starting with `#` are skipped; `#` inside a value
///   is kept.
/// * Double-quoted values support `\"`; single-quoted values are stripped
///   verbatim. No multiline values.
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        let value = v.trim();
        let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value[1..value.len() - 1].replace("\\\"", "\"")
        } else if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
            value[1..value.len() - 1].to_string()
        } else {
            value.to_string()
        };
        out.insert(key.to_string(), value);
    }
    out
}

/// Loads `.env` from `override_dir` or the current directory. A missing file
/// yields an empty map.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let Some(path) = dotenv_path(override_dir) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path)?;
    Ok(parse_dotenv(&content))
}
