// src/deployment/mod.rs

//! Where the desired set of application versions comes from.

use std::fmt;

use crate::errors::RepositoryError;
use crate::process::BoxFuture;
use crate::types::AppDescriptor;

pub mod file;
pub mod memory;
pub mod placement;

pub use file::TomlDeploymentRepository;
pub use memory::InMemoryDeploymentRepository;
pub use placement::Placement;

/// Source of the app versions this instance should be running.
///
/// Implementations return only the entries meant for the local instance;
/// cluster targeting happens before the orchestrator sees anything.
pub trait DeploymentRepository: Send + Sync + fmt::Debug {
    fn fetch_desired(&self) -> BoxFuture<'_, Result<Vec<AppDescriptor>, RepositoryError>>;
}
