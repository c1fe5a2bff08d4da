//! Parse a project `.env` file into a key-value map. Application (respecting existing
//! env) happens in `lib.rs`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn env_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = override_dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Minimal parser: `KEY=VALUE` per line, `#` comments and blanks skipped, keys and
/// values trimmed, surrounding single or double quotes stripped (with `\"` unescaping
/// inside double quotes). No multiline values.
fn parse(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
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

/// Load `.env` from `override_dir` or the current directory. Missing file is an empty map.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let Some(path) = env_path(override_dir) else {
        return Ok(HashMap::new());
    };
    Ok(parse(&std::fs::read_to_string(path)?))
}
