// src/supervisor/core.rs

//! The process supervisor.
//!
//! Concurrency layout:
//! - the app map sits behind a `std::sync::RwLock` that is only held for map
//!   lookups and inserts, never across an `.await`;
//! - each app's mutable state sits behind its own `tokio::sync::Mutex`, so a
//!   slow close of one app never blocks deploys, exits or status queries of
//!   another.
//!
//! Every launched process gets a watcher task that waits on its exit signal.
//! The watcher and `undeploy` serialise on the app mutex; `undeploy` marks the
//! app `Stopping` before closing, which is how a planned exit is told apart
//! from a crash even for process variants without the shutdown handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use semver::Version;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::DeployError;
use crate::process::{CloseOutcome, ExitSignal, ProcessExit, ProcessFactory};
use crate::supervisor::backoff::RelaunchBackoff;
use crate::supervisor::deployed::{AppStatus, DeployedApp, DeployedAppStatus, ExitReason};
use crate::types::{AppDescriptor, AppId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Maximum number of automatic relaunches per deployed app.
    pub restart_ceiling: u32,
    /// Upper bound on how long `undeploy` waits for `close()`.
    pub close_timeout: Duration,
    pub relaunch_backoff: RelaunchBackoff,
}

/// Notifications for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Restarted {
        app: AppId,
        version: Version,
        restart_count: u32,
    },
    /// The app crash-looped past the ceiling and is now permanently failed.
    AppFailed {
        app: AppId,
        version: Version,
        ceiling: u32,
    },
    /// `undeploy` had to kill the process because it did not stop on request.
    ForceStopped { app: AppId, version: Version },
}

#[derive(Debug)]
struct AppSlot {
    descriptor: AppDescriptor,
    state: Mutex<DeployedApp>,
}

#[derive(Debug)]
struct SupervisorInner {
    factory: Arc<dyn ProcessFactory>,
    apps: RwLock<HashMap<AppId, Arc<AppSlot>>>,
    options: SupervisorOptions,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    generations: AtomicU64,
}

/// Owns every deployed app of this instance. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ProcessSupervisor {
    pub fn new(
        factory: Arc<dyn ProcessFactory>,
        options: SupervisorOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = SupervisorInner {
            factory,
            apps: RwLock::new(HashMap::new()),
            options,
            events,
            generations: AtomicU64::new(0),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    /// Start a process for `descriptor` and begin supervising it.
    pub async fn deploy(&self, descriptor: AppDescriptor) -> Result<(), DeployError> {
        let app_id = descriptor.app_id.clone();
        let generation = self.inner.next_generation();
        let process = self.inner.factory.create(&descriptor);

        let slot = Arc::new(AppSlot {
            descriptor: descriptor.clone(),
            state: Mutex::new(DeployedApp::new(process, generation)),
        });

        // Hold the app lock before the slot becomes visible, so nobody sees
        // a registered app whose process has not been started.
        let mut app = slot.state.lock().await;
        {
            let mut apps = self.inner.write_apps();
            if apps.contains_key(&app_id) {
                return Err(DeployError::AlreadyDeployed(app_id));
            }
            apps.insert(app_id.clone(), Arc::clone(&slot));
        }

        if let Err(source) = app.process.start().await {
            drop(app);
            self.inner.remove_slot(&app_id, &slot);
            warn!(app = %descriptor, error = %source, "deploy failed to launch");
            return Err(DeployError::Launch {
                app: descriptor.to_string(),
                source,
            });
        }

        let exit = app.process.exit_signal();
        drop(app);

        info!(app = %descriptor, "deployed");
        self.inner.spawn_watcher(&slot, generation, exit);
        Ok(())
    }

    /// Gracefully close the app's process and forget the app.
    pub async fn undeploy(&self, app_id: &AppId) -> Result<CloseOutcome, DeployError> {
        let slot = self
            .inner
            .read_apps()
            .get(app_id)
            .cloned()
            .ok_or_else(|| DeployError::NotDeployed(app_id.clone()))?;

        let mut app = slot.state.lock().await;
        if app.status == AppStatus::Stopping {
            // A concurrent undeploy already closed and removed it.
            return Err(DeployError::NotDeployed(app_id.clone()));
        }
        app.status = AppStatus::Stopping;

        let timeout = self.inner.options.close_timeout;
        let closed = tokio::time::timeout(timeout, app.process.close()).await;
        let Ok(outcome) = closed else {
            warn!(
                app = %slot.descriptor,
                timeout = ?timeout,
                "close did not finish in time; terminating"
            );
            app.process.terminate().await;
            drop(app);
            self.inner.remove_slot(app_id, &slot);
            self.inner.force_stopped(&slot.descriptor);
            return Err(DeployError::CloseTimedOut {
                app: app_id.clone(),
                timeout,
            });
        };

        let reason = match outcome {
            CloseOutcome::Cooperative(exit) => ExitReason::Requested(exit.code),
            CloseOutcome::AlreadyExited => app
                .last_exit_reason
                .unwrap_or(ExitReason::Requested(app.process.exit_code())),
            CloseOutcome::ForcedKill => ExitReason::ForcedKill,
        };
        drop(app);

        self.inner.remove_slot(app_id, &slot);
        if outcome.is_forced() {
            self.inner.force_stopped(&slot.descriptor);
        }
        info!(app = %slot.descriptor, reason = ?reason, "undeployed");
        Ok(outcome)
    }

    /// Descriptors of every deployed app, failed ones included, ordered by
    /// app id.
    pub fn list_deployed(&self) -> Vec<AppDescriptor> {
        let apps = self.inner.read_apps();
        let mut descriptors: Vec<AppDescriptor> =
            apps.values().map(|slot| slot.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        descriptors
    }

    pub async fn status(&self, app_id: &AppId) -> Option<DeployedAppStatus> {
        let slot = self.inner.read_apps().get(app_id).cloned()?;
        let app = slot.state.lock().await;
        Some(app.snapshot(&slot.descriptor))
    }

    /// Undeploy every app concurrently. Used when the host stops.
    pub async fn shutdown_all(&self) -> Vec<(AppId, Result<CloseOutcome, DeployError>)> {
        let ids: Vec<AppId> = self.inner.read_apps().keys().cloned().collect();
        if ids.is_empty() {
            return Vec::new();
        }
        info!(apps = ids.len(), "stopping all applications");

        let mut set = JoinSet::new();
        for id in ids {
            let supervisor = self.clone();
            set.spawn(async move {
                let result = supervisor.undeploy(&id).await;
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "undeploy task panicked during shutdown"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

impl SupervisorInner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read_apps(&self) -> RwLockReadGuard<'_, HashMap<AppId, Arc<AppSlot>>> {
        self.apps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_apps(&self) -> RwLockWriteGuard<'_, HashMap<AppId, Arc<AppSlot>>> {
        self.apps.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `app_id` only if it still maps to `slot`.
    fn remove_slot(&self, app_id: &AppId, slot: &Arc<AppSlot>) {
        let mut apps = self.write_apps();
        if apps.get(app_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            apps.remove(app_id);
        }
    }

    fn force_stopped(&self, descriptor: &AppDescriptor) {
        warn!(app = %descriptor, "application was killed during undeploy");
        let _ = self.events.send(SupervisorEvent::ForceStopped {
            app: descriptor.app_id.clone(),
            version: descriptor.version.clone(),
        });
    }

    fn spawn_watcher(self: &Arc<Self>, slot: &Arc<AppSlot>, generation: u64, exit: ExitSignal) {
        tokio::spawn(watch_app(
            Arc::downgrade(self),
            Arc::downgrade(slot),
            generation,
            exit,
        ));
    }

    /// React to an exit. Returns the new generation and exit signal when the
    /// app was relaunched.
    async fn handle_exit(
        &self,
        slot: &AppSlot,
        generation: u64,
        exit: ProcessExit,
    ) -> Option<(u64, ExitSignal)> {
        let mut app = slot.state.lock().await;

        if app.generation != generation {
            debug!(app = %slot.descriptor, generation, "exit from a superseded process; ignoring");
            return None;
        }
        match app.status {
            AppStatus::Stopping => {
                debug!(app = %slot.descriptor, "planned exit during undeploy");
                return None;
            }
            AppStatus::Failed => return None,
            AppStatus::Running => {}
        }

        app.last_exit_reason = Some(if exit.forced {
            ExitReason::ForcedKill
        } else {
            ExitReason::Crashed(exit.code)
        });
        warn!(
            app = %slot.descriptor,
            exit_code = ?exit.code,
            forced = exit.forced,
            restart_count = app.restart_count,
            "application exited unexpectedly"
        );

        self.restart_or_fail(slot, &mut app).await
    }

    async fn restart_or_fail(
        &self,
        slot: &AppSlot,
        app: &mut DeployedApp,
    ) -> Option<(u64, ExitSignal)> {
        let ceiling = self.options.restart_ceiling;
        let mut failed_launches = 0;

        while app.restart_count < ceiling {
            if failed_launches > 0 {
                // The app lock stays held, so an undeploy waits out the delay.
                tokio::time::sleep(self.options.relaunch_backoff.delay(failed_launches)).await;
            }
            app.restart_count += 1;
            let mut process = self.factory.create(&slot.descriptor);

            match process.start().await {
                Ok(()) => {
                    let generation = self.next_generation();
                    let exit = process.exit_signal();
                    app.process = process;
                    app.generation = generation;

                    info!(
                        app = %slot.descriptor,
                        restart_count = app.restart_count,
                        ceiling,
                        "application relaunched"
                    );
                    let _ = self.events.send(SupervisorEvent::Restarted {
                        app: slot.descriptor.app_id.clone(),
                        version: slot.descriptor.version.clone(),
                        restart_count: app.restart_count,
                    });
                    return Some((generation, exit));
                }
                Err(e) => {
                    failed_launches += 1;
                    app.last_exit_reason = Some(ExitReason::LaunchFailed);
                    warn!(
                        app = %slot.descriptor,
                        restart_count = app.restart_count,
                        error = %e,
                        "relaunch failed"
                    );
                }
            }
        }

        app.status = AppStatus::Failed;
        let failure = DeployError::RestartCeilingExceeded {
            app: slot.descriptor.app_id.clone(),
            ceiling,
        };
        error!(app = %slot.descriptor, error = %failure, "application marked failed");
        let _ = self.events.send(SupervisorEvent::AppFailed {
            app: slot.descriptor.app_id.clone(),
            version: slot.descriptor.version.clone(),
            ceiling,
        });
        None
    }
}

/// Follow one app across relaunches until it is stopped, fails, or is
/// forgotten.
async fn watch_app(
    inner: Weak<SupervisorInner>,
    slot: Weak<AppSlot>,
    mut generation: u64,
    mut exit: ExitSignal,
) {
    loop {
        let Some(observed) = exit.wait().await else {
            return;
        };
        let (Some(inner), Some(slot)) = (inner.upgrade(), slot.upgrade()) else {
            return;
        };
        match inner.handle_exit(&slot, generation, observed).await {
            Some((next_generation, next_exit)) => {
                generation = next_generation;
                exit = next_exit;
            }
            None => return,
        }
    }
}
