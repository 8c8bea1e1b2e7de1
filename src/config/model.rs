// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::InstanceIdentity;

/// Configuration as read from the TOML file, before validation.
///
/// ```toml
/// [instance]
/// cluster_id = "prod-east"
/// update_domain = "1"
///
/// [update]
/// check_for_updates_period = 10
///
/// [storage]
/// deployment_repository = "deployments.toml"
/// update_session_store = "sessions"
///
/// [cluster_properties]
/// region = "east"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRolldConfig {
    #[serde(default)]
    pub instance: InstanceSection,

    #[serde(default)]
    pub update: UpdateSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub cluster_properties: BTreeMap<String, String>,
}

/// `[instance]` section. Everything is optional here so that CLI flags can
/// fill gaps; validation enforces the required fields afterwards.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSection {
    pub cluster_id: Option<String>,
    pub update_domain: Option<String>,
    /// Falls back to the `HOSTNAME` environment variable.
    pub instance_id: Option<String>,
    pub local_store_path: Option<PathBuf>,
}

/// `[update]` section. Durations are whole seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSection {
    #[serde(default = "default_check_for_updates_period")]
    pub check_for_updates_period: u64,

    #[serde(default = "default_application_restart_count")]
    pub application_restart_count: u32,

    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout: u64,

    #[serde(default = "default_lease_duration")]
    pub lease_duration: u64,

    #[serde(default = "default_storage_timeout")]
    pub storage_timeout: u64,
}

fn default_check_for_updates_period() -> u64 {
    10
}

fn default_application_restart_count() -> u32 {
    3
}

fn default_graceful_shutdown_timeout() -> u64 {
    30
}

fn default_lease_duration() -> u64 {
    60
}

fn default_storage_timeout() -> u64 {
    10
}

impl Default for UpdateSection {
    fn default() -> Self {
        Self {
            check_for_updates_period: default_check_for_updates_period(),
            application_restart_count: default_application_restart_count(),
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
            lease_duration: default_lease_duration(),
            storage_timeout: default_storage_timeout(),
        }
    }
}

/// `[storage]` section. Relative paths are resolved against the directory
/// holding the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    pub deployment_repository: Option<PathBuf>,
    pub update_session_store: Option<PathBuf>,
}

/// Values given on the command line, applied over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub cluster_id: Option<String>,
    pub update_domain: Option<String>,
    pub instance_id: Option<String>,
    pub check_for_updates_period: Option<u64>,
    pub application_restart_count: Option<u32>,
    pub deployment_repository: Option<PathBuf>,
    pub update_session_store: Option<PathBuf>,
    /// Merged key by key into `[cluster_properties]`.
    pub cluster_properties: BTreeMap<String, String>,
}

impl RawRolldConfig {
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = &overrides.cluster_id {
            self.instance.cluster_id = Some(v.clone());
        }
        if let Some(v) = &overrides.update_domain {
            self.instance.update_domain = Some(v.clone());
        }
        if let Some(v) = &overrides.instance_id {
            self.instance.instance_id = Some(v.clone());
        }
        if let Some(v) = overrides.check_for_updates_period {
            self.update.check_for_updates_period = v;
        }
        if let Some(v) = overrides.application_restart_count {
            self.update.application_restart_count = v;
        }
        if let Some(v) = &overrides.deployment_repository {
            self.storage.deployment_repository = Some(v.clone());
        }
        if let Some(v) = &overrides.update_session_store {
            self.storage.update_session_store = Some(v.clone());
        }
        for (key, value) in &overrides.cluster_properties {
            self.cluster_properties.insert(key.clone(), value.clone());
        }
    }
}

/// Validated configuration, the single input of [`crate::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolldConfig {
    pub identity: InstanceIdentity,
    pub check_for_updates_period: Duration,
    pub application_restart_count: u32,
    pub graceful_shutdown_timeout: Duration,
    pub lease_duration: Duration,
    pub storage_timeout: Duration,
    pub deployment_repository: PathBuf,
    pub update_session_store: PathBuf,
    pub cluster_properties: BTreeMap<String, String>,
}

