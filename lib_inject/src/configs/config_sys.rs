//! # Layered Property Loading
//!
//! Builds a [`Properties`] store from JSON files and, optionally, environment
//! variables. The per-process layout mirrors the deployment convention:
//!
//! 1. `config.global.json`
//! 2. `<basename>.common.json`
//! 3. `<basename>.<mode>.json`
//! 4. `<basename>.<mode>.<os>.json`
//!
//! all looked up in `CONFIGS_LOCATION` (or next to the executable). Later
//! layers override earlier ones; missing files are skipped.

use std::path::{Path, PathBuf};
use std::{env, fmt};

use thiserror::Error;

use config::{ext::*, *};

use super::properties::Properties;

const CONFIG_GLOBAL_NAME: &str = "config.global.json";
const DEFAULT_RUNNING_MODE: &str = "development";

#[derive(Debug, Error)]
pub enum PropertyLoadError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    VarError(#[from] env::VarError),

    #[error("Failed to build configuration: {0}")]
    BuildError(String),
}

/// The property files that apply to one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFiles {
    pub running_mode: String,
    pub config_dir: PathBuf,
    /// Existing files, lowest precedence first.
    pub files: Vec<PathBuf>,
}

impl fmt::Display for PropertyFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Running mode: {}", self.running_mode)?;
        writeln!(f, "Config dir: {}", self.config_dir.display())?;
        for file in &self.files {
            writeln!(f, "  {}", file.display())?;
        }
        Ok(())
    }
}

/// Resolves the property files for the current executable.
///
/// The running mode comes from `RUNNING_MODE_<BASENAME>` and defaults to
/// `development`; the directory from `CONFIGS_LOCATION` and defaults to the
/// executable's directory.
pub fn discover_property_files() -> Result<PropertyFiles, PropertyLoadError> {
    let current_exe = env::current_exe()?;
    let basename = process_basename(&current_exe)?;
    let location = current_exe
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| std::io::Error::other("Failed to get the process location"))?;

    let running_mode = match env::var(format!("RUNNING_MODE_{}", basename.to_uppercase())) {
        Ok(mode) => mode,
        Err(env::VarError::NotPresent) => DEFAULT_RUNNING_MODE.to_string(),
        Err(e) => return Err(PropertyLoadError::VarError(e)),
    };
    let config_dir = env::var("CONFIGS_LOCATION").map(PathBuf::from).unwrap_or(location);

    Ok(discover_in(&config_dir, &basename, &running_mode))
}

/// Lists the layered files that exist in `config_dir` for `basename` running
/// in `running_mode`.
pub fn discover_in(config_dir: &Path, basename: &str, running_mode: &str) -> PropertyFiles {
    let candidates = [
        config_dir.join(CONFIG_GLOBAL_NAME),
        config_dir.join(format!("{}.common.json", basename)),
        config_dir.join(format!("{}.{}.json", basename, running_mode)),
        config_dir.join(format!("{}.{}.{}.json", basename, running_mode, env::consts::OS)),
    ];

    PropertyFiles {
        running_mode: running_mode.to_string(),
        config_dir: config_dir.to_path_buf(),
        files: candidates.into_iter().filter(|p| p.is_file()).collect(),
    }
}

/// Loads `files` (in order, later wins) and, if `with_env_vars`, the process
/// environment on top, flattened into a [`Properties`] store.
pub fn load_properties(files: &[PathBuf], with_env_vars: bool) -> Result<Properties, PropertyLoadError> {
    let mut builder = DefaultConfigurationBuilder::new();
    for file in files {
        let file = file.to_string_lossy().to_string();
        builder.add_json_file(&file.is().optional());
    }
    if with_env_vars {
        builder.add_env_vars();
    }

    let config_data: Box<dyn ConfigurationRoot> = builder
        .build()
        .map_err(|e| PropertyLoadError::BuildError(format!("{:?}", e)))?;

    let mut properties = Properties::new();
    for (key, value) in config_data.iter(None) {
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

/// [`discover_property_files`] followed by [`load_properties`] with
/// environment variables enabled.
pub fn load_process_properties() -> Result<Properties, PropertyLoadError> {
    let files = discover_property_files()?;
    log::info!("Loading properties\n{}", files);
    load_properties(&files.files, true)
}

fn process_basename(exe_path: &Path) -> Result<String, PropertyLoadError> {
    exe_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| PropertyLoadError::IoError(std::io::Error::other("Failed to get the process basename")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::properties::PropertySource;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_discover_in_keeps_existing_files_in_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.global.json"), "{}").unwrap();
        fs::write(dir.path().join("app.production.json"), "{}").unwrap();
        fs::write(dir.path().join("app.staging.json"), "{}").unwrap();

        let found = discover_in(dir.path(), "app", "production");
        assert_eq!(found.running_mode, "production");
        assert_eq!(
            found.files,
            vec![dir.path().join("config.global.json"), dir.path().join("app.production.json")]
        );
    }

    #[test]
    fn test_load_properties_flattens_and_layers() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("config.global.json");
        let mode = dir.path().join("app.production.json");
        fs::write(
            &global,
            r#"{"db": {"main": {"url": "postgres://global/db", "username": "app"}}, "redis": {"cache": {"port": 6380}}}"#,
        )
        .unwrap();
        fs::write(&mode, r#"{"db": {"main": {"url": "postgres://prod/db"}}}"#).unwrap();

        let props = load_properties(&[global, mode], false).unwrap();
        assert_eq!(props.get_string("db.main.url").as_deref(), Some("postgres://prod/db"));
        assert_eq!(props.get_string("db.main.username").as_deref(), Some("app"));
        assert_eq!(props.get_int("redis.cache.port"), Ok(Some(6380)));
    }

    #[test]
    fn test_missing_files_are_optional() {
        let dir = tempdir().unwrap();
        let props = load_properties(&[dir.path().join("absent.json")], false).unwrap();
        assert!(props.is_empty());
    }
}
