// src/supervisor/deployed.rs

//! Per-app bookkeeping owned by the supervisor.

use crate::process::ManagedProcess;
use crate::types::AppDescriptor;

/// Why the last process of an app ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Exited on its own while nobody asked it to stop.
    Crashed(Option<i32>),
    /// Exited after a shutdown request, or was already gone when closed.
    Requested(Option<i32>),
    /// Killed, either because the handshake timed out or the channel failed,
    /// or because the kill came from outside the supervisor.
    ForcedKill,
    /// A relaunch attempt failed before the process came up.
    LaunchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    Running,
    /// `undeploy` is closing the process; exits are expected.
    Stopping,
    /// Crashed past the restart ceiling. Never restarted automatically.
    Failed,
}

/// Mutable state of one deployed app.
#[derive(Debug)]
pub struct DeployedApp {
    pub(crate) process: Box<dyn ManagedProcess>,
    pub(crate) restart_count: u32,
    pub(crate) last_exit_reason: Option<ExitReason>,
    pub(crate) status: AppStatus,
    /// Bumped on every (re)launch so exits from superseded processes are
    /// recognised and ignored.
    pub(crate) generation: u64,
}

impl DeployedApp {
    pub(crate) fn new(process: Box<dyn ManagedProcess>, generation: u64) -> Self {
        Self {
            process,
            restart_count: 0,
            last_exit_reason: None,
            status: AppStatus::Running,
            generation,
        }
    }

    pub(crate) fn snapshot(&self, descriptor: &AppDescriptor) -> DeployedAppStatus {
        DeployedAppStatus {
            descriptor: descriptor.clone(),
            restart_count: self.restart_count,
            last_exit_reason: self.last_exit_reason,
            status: self.status,
            running: self.process.is_running(),
            pid: self.process.pid(),
        }
    }
}

/// Point-in-time view of a deployed app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedAppStatus {
    pub descriptor: AppDescriptor,
    pub restart_count: u32,
    pub last_exit_reason: Option<ExitReason>,
    pub status: AppStatus,
    pub running: bool,
    pub pid: Option<u32>,
}
