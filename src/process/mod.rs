// src/process/mod.rs

//! Hosted application processes.
//!
//! Everything the supervisor holds is a [`ManagedProcess`]:
//! - [`os::OsProcess`] wraps one OS child process.
//! - [`graceful::GracefulShutdownProcess`] decorates any `ManagedProcess` with
//!   the cooperative shutdown handshake over an [`ipc::IpcChannel`].
//! - [`factory::ProcessFactory`] decides which variant an app gets.
//!
//! Exit notification is an explicit per-process channel ([`ExitSignal`]), not
//! a callback: every subscriber observes the same [`ProcessExit`] value, which
//! is published exactly once per process lifetime.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::watch;

use crate::errors::LaunchError;

pub mod factory;
pub mod graceful;
pub mod ipc;
pub mod os;

pub use factory::{OsProcessFactory, ProcessFactory};
pub use graceful::{GracefulShutdownProcess, ShutdownState};
pub use ipc::{IpcChannel, PipeChannel, ShutdownRequest};
pub use os::{LaunchSpec, OsProcess};

/// Boxed future used at the trait seams so the traits stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally (`None` when killed by a
    /// signal).
    pub code: Option<i32>,
    /// True when the exit was caused by a forced termination.
    pub forced: bool,
}

/// Result of asking a process to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The process was already gone when close was called.
    AlreadyExited,
    /// The process acknowledged the shutdown request by exiting.
    Cooperative(ProcessExit),
    /// The process had to be killed.
    ForcedKill,
}

impl CloseOutcome {
    pub fn is_forced(&self) -> bool {
        matches!(self, CloseOutcome::ForcedKill)
    }
}

/// Producer half of a process exit notification.
#[derive(Debug)]
pub struct ExitNotifier {
    tx: watch::Sender<Option<ProcessExit>>,
}

impl ExitNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish the exit. Only the first call has any effect; returns whether
    /// this call was the one that published.
    pub fn notify(&self, exit: ProcessExit) -> bool {
        let mut published = false;
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(exit);
                published = true;
                true
            } else {
                false
            }
        });
        published
    }

    pub fn has_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> ExitSignal {
        ExitSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ExitNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber half of a process exit notification.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ExitSignal {
    /// Non-blocking look at the current value.
    pub fn peek(&self) -> Option<ProcessExit> {
        *self.rx.borrow()
    }

    /// Wait for the exit.
    ///
    /// Returns `None` if the producer went away without ever publishing,
    /// which only happens when a process handle is dropped unstarted.
    pub async fn wait(&mut self) -> Option<ProcessExit> {
        match self.rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => *exit,
            Err(_) => None,
        }
    }
}

/// The "managed process" capability shared by bare handles and decorators.
pub trait ManagedProcess: Send + Sync + fmt::Debug {
    /// Launch the process.
    fn start(&mut self) -> BoxFuture<'_, Result<(), LaunchError>>;

    fn is_running(&self) -> bool;

    /// Exit code once the process has exited normally.
    fn exit_code(&self) -> Option<i32>;

    /// Forcibly kill the process and wait for it to be gone. Idempotent.
    fn terminate(&mut self) -> BoxFuture<'_, ()>;

    /// Subscribe to this process's exit notification.
    fn exit_signal(&self) -> ExitSignal;

    /// Stop the process the best way this variant knows.
    fn close(&mut self) -> BoxFuture<'_, CloseOutcome>;

    fn pid(&self) -> Option<u32> {
        None
    }
}
