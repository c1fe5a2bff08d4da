//! Read `$XDG_CONFIG_HOME/<app>/config.toml` (fallback `~/.config/<app>/config.toml`)
//! and return its `[env]` table as a string map.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::LoadError;

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, toml::Value>,
}

fn config_path(app_name: &str) -> Result<PathBuf, LoadError> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .ok_or_else(|| LoadError::XdgPath("no config directory".to_string()))?;
    Ok(base.join(app_name).join("config.toml"))
}

/// Loads the `[env]` table. Missing file yields an empty map; scalar values are
/// stringified, non-scalar values are skipped.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = config_path(app_name)?;
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(LoadError::XdgRead(e)),
    };
    let parsed: ConfigFile = toml::from_str(&content)?;
    let mut out = HashMap::new();
    for (k, v) in parsed.env {
        let s = match v {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            _ => continue,
        };
        out.insert(k, s);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: scalar values of every TOML kind are stringified; tables are skipped.
    #[test]
    fn scalars_stringified_tables_skipped() {
        let _env = crate::test_env_lock();
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("autoweb");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(
            app.join("config.toml"),
            "[env]\nS = \"x\"\nI = 3\nF = 0.5\nB = true\n[env.nested]\nK = \"v\"\n",
        )
        .unwrap();

        let prev = std::env::var("XDG_CONFIG_HOME").ok();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let m = load_env_map("autoweb").unwrap();
        match prev {
            Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }

        assert_eq!(m.get("S"), Some(&"x".to_string()));
        assert_eq!(m.get("I"), Some(&"3".to_string()));
        assert_eq!(m.get("F"), Some(&"0.5".to_string()));
        assert_eq!(m.get("B"), Some(&"true".to_string()));
        assert!(!m.contains_key("nested"));
    }
}
