// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigOverrides, RawRolldConfig, RolldConfig};
use crate::errors::Result;

/// Read and deserialize a config file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawRolldConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawRolldConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load, validate, and resolve storage paths relative to the config file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<RolldConfig> {
    load_with_overrides(path, &ConfigOverrides::default())
}

/// Like [`load_and_validate`], with command-line values applied on top of
/// the file before validation.
pub fn load_with_overrides(path: impl AsRef<Path>, overrides: &ConfigOverrides) -> Result<RolldConfig> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    finish(raw, path, overrides)
}

/// Like [`load_with_overrides`], but a missing file is not an error: the
/// command-line values then have to supply every required setting.
pub fn load_if_present(path: impl AsRef<Path>, overrides: &ConfigOverrides) -> Result<RolldConfig> {
    let path = path.as_ref();
    let raw = if path.is_file() {
        load_from_path(path)?
    } else {
        debug!(path = %path.display(), "no config file; using defaults and flags");
        RawRolldConfig::default()
    };
    finish(raw, path, overrides)
}

fn finish(mut raw: RawRolldConfig, path: &Path, overrides: &ConfigOverrides) -> Result<RolldConfig> {
    raw.apply_overrides(overrides);

    let mut config = RolldConfig::try_from(raw)?;
    let root = config_root_dir(path);
    config.deployment_repository = resolve(&root, &config.deployment_repository);
    config.update_session_store = resolve(&root, &config.update_session_store);
    Ok(config)
}

/// Default config location: `rolld.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("rolld.toml")
}

/// Directory of the config file, or the working directory for a bare file
/// name.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
