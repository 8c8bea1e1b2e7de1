// src/process/factory.rs

use std::fmt;
use std::time::Duration;

use crate::process::graceful::GracefulShutdownProcess;
use crate::process::os::{LaunchSpec, OsProcess};
use crate::process::ManagedProcess;
use crate::types::{AppDescriptor, InstanceIdentity};

/// Builds an unstarted process for a descriptor.
///
/// The supervisor only ever sees `Box<dyn ManagedProcess>`; whether that is a
/// bare handle or a graceful-shutdown decorator is decided here. Tests plug in
/// a factory producing fake processes.
pub trait ProcessFactory: Send + Sync + fmt::Debug {
    fn create(&self, descriptor: &AppDescriptor) -> Box<dyn ManagedProcess>;
}

/// Production factory launching real OS processes.
#[derive(Debug, Clone)]
pub struct OsProcessFactory {
    identity: InstanceIdentity,
    graceful_timeout: Duration,
}

impl OsProcessFactory {
    pub fn new(identity: InstanceIdentity, graceful_timeout: Duration) -> Self {
        Self {
            identity,
            graceful_timeout,
        }
    }
}

impl ProcessFactory for OsProcessFactory {
    fn create(&self, descriptor: &AppDescriptor) -> Box<dyn ManagedProcess> {
        let process = OsProcess::new(LaunchSpec::for_app(&self.identity, descriptor));

        if descriptor.graceful_shutdown {
            let channel = process.stdin_channel();
            Box::new(GracefulShutdownProcess::new(
                descriptor.to_string(),
                process,
                channel,
                self.graceful_timeout,
            ))
        } else {
            Box::new(process)
        }
    }
}
