//! Configuration for thoughtloom runs.
//!
//! Two layers, both resolved with priority **existing env > project `.env` > XDG `config.toml`**:
//!
//! - [`load_and_apply`] copies `.env` pairs and the XDG `[env]` table into the process
//!   environment (only for keys not already set), so capability backends can read credentials.
//! - [`load_run_config`] builds a [`RunConfig`] from defaults, the XDG `[run]` table and
//!   `<APP>_<FIELD>` environment variables, then validates it.

mod dotenv;
#[cfg(feature = "tracing-init")]
mod logging;
mod run_config;
mod xdg_toml;

use std::path::Path;
use thiserror::Error;

#[cfg(feature = "tracing-init")]
pub use logging::init_tracing;
pub use run_config::{RunConfig, RunConfigError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
    #[error("run config: {0}")]
    RunConfig(#[from] RunConfigError),
}

/// Sets environment variables from `.env` and the XDG `[env]` table for keys that are not set yet.
///
/// * `app_name`: directory under `$XDG_CONFIG_HOME`, e.g. `"thoughtloom"`.
/// * `override_dir`: where to look for `.env` instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let mut merged = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    for (key, value) in xdg_map {
        merged.entry(key).or_insert(value);
    }

    for (key, value) in merged {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

/// Environment prefix for `app_name`: upper-cased, `-` replaced by `_` (`thoughtloom` → `THOUGHTLOOM`).
pub fn env_prefix(app_name: &str) -> String {
    app_name.to_uppercase().replace('-', "_")
}

/// Applies `.env`/XDG env, then resolves and validates the [`RunConfig`] for `app_name`.
pub fn load_run_config(app_name: &str, override_dir: Option<&Path>) -> Result<RunConfig, LoadError> {
    load_and_apply(app_name, override_dir)?;
    let mut config = xdg_toml::load_run_table(app_name)?.unwrap_or_default();
    config.apply_overrides(&env_prefix(app_name), |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
pub(crate) fn test_env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
