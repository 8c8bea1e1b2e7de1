// src/deployment/file.rs

//! Deployment repository backed by a TOML manifest.
//!
//! ```toml
//! [[app]]
//! id = "hello"
//! version = "1.2.0"
//! binary = "apps/hello/1.2.0/hello"
//! args = ["--port", "8080"]
//! graceful_shutdown = true
//! target_clusters = ["prod-east"]
//!
//! [app.required_properties]
//! region = "east"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use semver::Version;
use serde::Deserialize;
use tracing::debug;

use crate::deployment::{DeploymentRepository, Placement};
use crate::errors::RepositoryError;
use crate::fs::FileSystem;
use crate::process::BoxFuture;
use crate::types::{AppDescriptor, AppId};

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "app")]
    pub apps: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub version: String,
    pub binary: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown: bool,

    /// Empty means every cluster.
    #[serde(default)]
    pub target_clusters: Vec<String>,

    #[serde(default)]
    pub required_properties: BTreeMap<String, String>,
}

fn default_graceful_shutdown() -> bool {
    true
}

impl ManifestEntry {
    fn to_descriptor(&self) -> Result<AppDescriptor, RepositoryError> {
        let invalid = |reason: String| RepositoryError::InvalidEntry {
            app: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if self.binary.as_os_str().is_empty() {
            return Err(invalid("binary must not be empty".to_string()));
        }
        let version = Version::parse(self.version.trim())
            .map_err(|e| invalid(format!("version '{}': {e}", self.version)))?;

        Ok(AppDescriptor {
            app_id: AppId::new(self.id.trim()),
            version,
            binary_location: self.binary.clone(),
            args: self.args.clone(),
            graceful_shutdown: self.graceful_shutdown,
        })
    }
}

/// Parse a manifest and keep the entries `placement` admits.
pub fn parse_manifest(text: &str, placement: &Placement) -> Result<Vec<AppDescriptor>, RepositoryError> {
    let manifest: Manifest = toml::from_str(text)?;

    let mut desired = Vec::with_capacity(manifest.apps.len());
    for entry in &manifest.apps {
        // Entries for other clusters are not validated beyond parsing.
        if !placement.admits(&entry.target_clusters, &entry.required_properties) {
            debug!(app = %entry.id, version = %entry.version, "manifest entry not targeted here");
            continue;
        }
        desired.push(entry.to_descriptor()?);
    }
    Ok(desired)
}

#[derive(Debug, Clone)]
pub struct TomlDeploymentRepository {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    placement: Placement,
}

impl TomlDeploymentRepository {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>, placement: Placement) -> Self {
        Self {
            fs,
            path: path.into(),
            placement,
        }
    }
}

impl DeploymentRepository for TomlDeploymentRepository {
    fn fetch_desired(&self) -> BoxFuture<'_, Result<Vec<AppDescriptor>, RepositoryError>> {
        Box::pin(async move {
            let text = self
                .fs
                .read_to_string(&self.path)
                .map_err(|e| RepositoryError::Read(format!("{e:#}")))?;
            parse_manifest(&text, &self.placement)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_minimal_entry() {
        let text = r#"
            [[app]]
            id = "hello"
            version = "1.0.0"
            binary = "hello"
        "#;
        let desired = parse_manifest(text, &Placement::default()).unwrap();
        assert_eq!(desired.len(), 1);
        assert!(desired[0].graceful_shutdown);
        assert!(desired[0].args.is_empty());
    }

    #[test]
    fn empty_manifest_means_nothing_desired() {
        assert!(parse_manifest("", &Placement::default()).unwrap().is_empty());
    }

    #[test]
    fn bad_version_is_an_invalid_entry() {
        let text = r#"
            [[app]]
            id = "hello"
            version = "one"
            binary = "hello"
        "#;
        let err = parse_manifest(text, &Placement::default()).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidEntry { ref app, .. } if app == "hello"));
    }
}
