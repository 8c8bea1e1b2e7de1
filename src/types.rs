// src/types.rs

//! Identity and descriptor types shared by every layer of `rolld`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Identifier of a hosted application, unique within a deployment repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        AppId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        AppId::new(s)
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        AppId(s)
    }
}

/// A deployment-safety partition of the cluster.
///
/// Update domains are opaque identifiers ("1", "2", "east-a", ...). Nothing in
/// the update protocol depends on their numeric order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateDomain(String);

impl UpdateDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        UpdateDomain(domain.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpdateDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UpdateDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("update domain must not be empty".to_string());
        }
        Ok(UpdateDomain(trimmed.to_string()))
    }
}

impl From<&str> for UpdateDomain {
    fn from(s: &str) -> Self {
        UpdateDomain::new(s)
    }
}

/// Who this instance is. Supplied once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub cluster_id: String,
    pub update_domain: UpdateDomain,
    pub instance_id: String,
    /// Root directory for app binaries with relative locations.
    pub local_store_path: PathBuf,
}

/// One desired application version as listed by the deployment repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppDescriptor {
    pub app_id: AppId,
    pub version: Version,
    /// Executable to launch. Relative paths are resolved against the local
    /// store (see [`AppDescriptor::resolve_binary`]).
    pub binary_location: PathBuf,
    pub args: Vec<String>,
    /// Whether the app speaks the stdin shutdown handshake.
    pub graceful_shutdown: bool,
}

impl AppDescriptor {
    pub fn new(app_id: impl Into<AppId>, version: Version, binary_location: impl Into<PathBuf>) -> Self {
        Self {
            app_id: app_id.into(),
            version,
            binary_location: binary_location.into(),
            args: Vec::new(),
            graceful_shutdown: true,
        }
    }

    pub fn resolve_binary(&self, local_store: &Path) -> PathBuf {
        if self.binary_location.is_absolute() {
            self.binary_location.clone()
        } else {
            local_store.join(&self.binary_location)
        }
    }
}

impl fmt::Display for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.app_id, self.version)
    }
}
