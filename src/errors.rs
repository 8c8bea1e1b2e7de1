// src/errors.rs

//! Crate-wide error types.
//!
//! Each component has its own error enum so callers can match on the
//! recoverable cases (`SessionError::Contended`, `DeployError::Launch`, ...).
//! [`RolldError`] is the umbrella used at the program boundary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::types::{AppId, UpdateDomain};

/// A process could not be started.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("binary not found: {0}")]
    BinaryMissing(PathBuf),

    #[error("binary is not an executable file: {0}")]
    NotExecutable(PathBuf),

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("process was already started")]
    AlreadyStarted,
}

/// The shutdown request could not reach the application process.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IPC peer is disconnected")]
    Disconnected,

    #[error("IPC write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by an [`UpdateSessionStore`](crate::session::UpdateSessionStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("stored record changed since it was read")]
    PreconditionFailed,

    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Another update domain holds the lease, or won the race for it.
    #[error("update session is contended (holder: {})", holder_name(.holder))]
    Contended { holder: Option<UpdateDomain> },

    /// The store could not be reached or answered garbage. Never proceed.
    #[error("update session coordination failed: {0}")]
    Coordination(String),

    /// The lease record was rewritten by someone else while we believed we
    /// held it.
    #[error("update session {0} was lost")]
    Lost(Uuid),
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("failed to launch {app}: {source}")]
    Launch {
        app: String,
        #[source]
        source: LaunchError,
    },

    #[error("app '{0}' is already deployed")]
    AlreadyDeployed(AppId),

    #[error("app '{0}' is not deployed")]
    NotDeployed(AppId),

    #[error("app '{app}' did not close within {timeout:?}")]
    CloseTimedOut { app: AppId, timeout: Duration },

    #[error("app '{app}' crashed past its restart ceiling of {ceiling}")]
    RestartCeilingExceeded { app: AppId, ceiling: u32 },
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("failed to read deployment repository: {0}")]
    Read(String),

    #[error("failed to parse deployment manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid manifest entry for app '{app}': {reason}")]
    InvalidEntry { app: String, reason: String },
}

#[derive(Error, Debug)]
pub enum RolldError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn holder_name(holder: &Option<UpdateDomain>) -> &str {
    holder.as_ref().map(|d| d.as_str()).unwrap_or("unknown")
}

pub type Result<T> = std::result::Result<T, RolldError>;
