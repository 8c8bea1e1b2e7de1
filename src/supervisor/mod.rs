// src/supervisor/mod.rs

//! Per-instance process supervision.
//!
//! [`ProcessSupervisor`] owns the deployed apps: it starts them, watches
//! every process for exits, relaunches crashed ones up to the configured
//! ceiling and closes them gracefully on undeploy.

pub mod backoff;
pub mod core;
pub mod deployed;

pub use backoff::RelaunchBackoff;
pub use core::{ProcessSupervisor, SupervisorEvent, SupervisorOptions};
pub use deployed::{AppStatus, DeployedAppStatus, ExitReason};
