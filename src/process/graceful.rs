// src/process/graceful.rs

//! Graceful shutdown decorator.
//!
//! Wraps any [`ManagedProcess`] and turns `close()` into "ask nicely over the
//! IPC channel, kill on timeout":
//!
//! ```text
//! Running --close()--> ShutdownRequested --exit--> Exited ----> Closed
//!    |                        |
//!    |                        +--timeout / send failure--> ForcedKill --> Closed
//!    +--close() when already exited--------------------------------------> Closed
//! ```
//!
//! The decorator re-publishes the inner exit on its own [`ExitSignal`] only
//! while the state is still `Running`. The relay task and `close()` decide
//! under the same lock, so once `close()` has left `Running` no subscriber of
//! the decorator will ever see the planned exit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::LaunchError;
use crate::process::ipc::{IpcChannel, ShutdownRequest};
use crate::process::{BoxFuture, CloseOutcome, ExitNotifier, ExitSignal, ManagedProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShutdownRequested,
    Exited,
    ForcedKill,
    Closed,
}

#[derive(Debug)]
pub struct GracefulShutdownProcess<P, C> {
    label: String,
    inner: P,
    channel: C,
    timeout: Duration,
    state: Arc<Mutex<ShutdownState>>,
    notifier: Arc<ExitNotifier>,
    relay: Option<JoinHandle<()>>,
}

impl<P, C> GracefulShutdownProcess<P, C>
where
    P: ManagedProcess,
    C: IpcChannel,
{
    pub fn new(label: impl Into<String>, inner: P, channel: C, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            inner,
            channel,
            timeout,
            state: Arc::new(Mutex::new(ShutdownState::Running)),
            notifier: Arc::new(ExitNotifier::new()),
            relay: None,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *lock_state(&self.state)
    }

    async fn start_inner(&mut self) -> Result<(), LaunchError> {
        self.inner.start().await?;

        let mut inner_exit = self.inner.exit_signal();
        let state = Arc::clone(&self.state);
        let notifier = Arc::clone(&self.notifier);
        let label = self.label.clone();

        self.relay = Some(tokio::spawn(async move {
            let Some(exit) = inner_exit.wait().await else {
                return;
            };
            let state = lock_state(&state);
            if *state == ShutdownState::Running {
                notifier.notify(exit);
            } else {
                debug!(app = %label, state = ?*state, "exit suppressed; shutdown was requested");
            }
        }));

        Ok(())
    }

    async fn close_gracefully(&mut self) -> CloseOutcome {
        let next = {
            let mut state = lock_state(&self.state);
            if *state != ShutdownState::Running {
                debug!(app = %self.label, state = ?*state, "close called again; nothing to do");
                return CloseOutcome::AlreadyExited;
            }
            *state = if self.inner.is_running() {
                ShutdownState::ShutdownRequested
            } else {
                ShutdownState::Closed
            };
            *state
        };

        if next == ShutdownState::Closed {
            self.channel.disconnect().await;
            info!(app = %self.label, "process already exited; closed without handshake");
            return CloseOutcome::AlreadyExited;
        }

        let request = ShutdownRequest::new(self.timeout);
        let mut exit = self.inner.exit_signal();

        if let Err(e) = self.channel.send(&request).await {
            warn!(
                app = %self.label,
                error = %e,
                "shutdown request could not be delivered; terminating"
            );
            return self.force_kill().await;
        }

        info!(
            app = %self.label,
            request_id = %request.request_id,
            timeout = ?self.timeout,
            "shutdown requested"
        );

        match tokio::time::timeout_at(request.deadline, exit.wait()).await {
            Ok(Some(exit)) => {
                self.set_state(ShutdownState::Exited);
                self.channel.disconnect().await;
                self.set_state(ShutdownState::Closed);
                info!(app = %self.label, exit_code = ?exit.code, "process exited cooperatively");
                CloseOutcome::Cooperative(exit)
            }
            Ok(None) => {
                warn!(app = %self.label, "exit signal dropped during shutdown; terminating");
                self.force_kill().await
            }
            Err(_elapsed) => {
                warn!(
                    app = %self.label,
                    request_id = %request.request_id,
                    "shutdown request timed out; terminating"
                );
                self.force_kill().await
            }
        }
    }

    async fn force_kill(&mut self) -> CloseOutcome {
        self.set_state(ShutdownState::ForcedKill);
        self.inner.terminate().await;
        self.channel.disconnect().await;
        self.set_state(ShutdownState::Closed);
        CloseOutcome::ForcedKill
    }

    fn set_state(&self, next: ShutdownState) {
        *lock_state(&self.state) = next;
    }
}

impl<P, C> ManagedProcess for GracefulShutdownProcess<P, C>
where
    P: ManagedProcess,
    C: IpcChannel,
{
    fn start(&mut self) -> BoxFuture<'_, Result<(), LaunchError>> {
        Box::pin(self.start_inner())
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn exit_code(&self) -> Option<i32> {
        self.inner.exit_code()
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        self.inner.terminate()
    }

    fn exit_signal(&self) -> ExitSignal {
        self.notifier.subscribe()
    }

    fn close(&mut self) -> BoxFuture<'_, CloseOutcome> {
        Box::pin(self.close_gracefully())
    }

    fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }
}

impl<P, C> Drop for GracefulShutdownProcess<P, C> {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

fn lock_state(state: &Mutex<ShutdownState>) -> MutexGuard<'_, ShutdownState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
