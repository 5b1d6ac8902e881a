//! Read `$XDG_CONFIG_HOME/<app>/config.toml`: the `[env]` table (applied to the process
//! environment) and the `[run]` table (defaults for [`RunConfig`]).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::{LoadError, RunConfig};

fn config_home() -> Result<PathBuf, LoadError> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir().ok_or_else(|| LoadError::XdgPath("no config directory for this platform".into()))
}

fn xdg_config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let path = config_home()?.join(app_name).join("config.toml");
    Ok(path.is_file().then_some(path))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    run: Option<RunConfig>,
}

fn read_config_file(app_name: &str) -> Result<ConfigFile, LoadError> {
    let Some(path) = xdg_config_path(app_name)? else {
        return Ok(ConfigFile::default());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    Ok(toml::from_str(&content)?)
}

/// Returns the `[env]` pairs. Missing file or section yields an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    Ok(read_config_file(app_name)?.env)
}

/// Returns the `[run]` table (fields absent from it keep their defaults), or `None` without one.
pub fn load_run_table(app_name: &str) -> Result<Option<RunConfig>, LoadError> {
    Ok(read_config_file(app_name)?.run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let _guard = crate::test_env_lock();
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    fn write_app_config(root: &std::path::Path, app: &str, body: &str) {
        let app_dir = root.join(app);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), body).unwrap();
    }

    #[test]
    fn missing_config_yields_empty_env_and_no_run_table() {
        let dir = tempfile::tempdir().unwrap();
        let (env_map, run) = with_xdg_home(dir.path(), || {
            (
                load_env_map("xdg-missing-app").unwrap(),
                load_run_table("xdg-missing-app").unwrap(),
            )
        });
        assert!(env_map.is_empty());
        assert!(run.is_none());
    }

    #[test]
    fn run_table_fills_unset_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_app_config(
            dir.path(),
            "xdg-run-app",
            "[run]\nnum_branches = 3\nbudget_limit = 1.5\n",
        );
        let run = with_xdg_home(dir.path(), || load_run_table("xdg-run-app"))
            .unwrap()
            .expect("run table");
        assert_eq!(run.num_branches, 3);
        assert_eq!(run.budget_limit, Some(1.5));
        assert_eq!(run.keep_n, RunConfig::default().keep_n);
    }

    #[test]
    fn env_table_is_read_alongside_run_table() {
        let dir = tempfile::tempdir().unwrap();
        write_app_config(
            dir.path(),
            "xdg-env-app",
            "[env]\nAPI_BASE = \"http://localhost\"\n\n[run]\nkeep_n = 2\n",
        );
        let env_map = with_xdg_home(dir.path(), || load_env_map("xdg-env-app")).unwrap();
        assert_eq!(env_map.get("API_BASE").map(String::as_str), Some("http://localhost"));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write_app_config(dir.path(), "xdg-bad-app", "[run\nkeep_n = \n");
        let result = with_xdg_home(dir.path(), || load_run_table("xdg-bad-app"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
