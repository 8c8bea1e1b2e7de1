#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rolld::process::ProcessFactory;
use rolld::supervisor::{ProcessSupervisor, RelaunchBackoff, SupervisorEvent, SupervisorOptions};
use tokio::sync::mpsc;

pub use rolld_test_utils::{eventually, init_tracing, wait_until, with_timeout};

pub fn supervisor_with(
    factory: impl ProcessFactory + 'static,
    restart_ceiling: u32,
) -> (ProcessSupervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
    ProcessSupervisor::new(
        Arc::new(factory),
        SupervisorOptions {
            restart_ceiling,
            close_timeout: Duration::from_secs(2),
            relaunch_backoff: RelaunchBackoff {
                first: Duration::from_millis(10),
                max: Duration::from_millis(40),
            },
        },
    )
}
