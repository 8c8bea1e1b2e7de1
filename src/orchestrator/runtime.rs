// src/orchestrator/runtime.rs

//! Async shell around [`compute_diff`]: polls the repository, takes the
//! update session and drives the supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::deployment::DeploymentRepository;
use crate::errors::{DeployError, Result, RolldError, SessionError};
use crate::orchestrator::diff::{compute_diff, DeploymentDiff};
use crate::process::CloseOutcome;
use crate::session::{UpdateSession, UpdateSessionCoordinator};
use crate::supervisor::{ProcessSupervisor, SupervisorEvent};
use crate::types::{AppId, InstanceIdentity, UpdateDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub check_for_updates_period: Duration,
}

/// Why a tick did nothing although something may need to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    RepositoryUnavailable(String),
    Contended { holder: Option<UpdateDomain> },
    Coordination(String),
}

/// What one applied cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub removed: Vec<AppId>,
    pub upgraded: Vec<AppId>,
    pub installed: Vec<AppId>,
    /// Apps whose change failed, with the error text. They stay as they were.
    pub failed: Vec<(AppId, String)>,
    /// Apps whose old process had to be killed because it ignored the
    /// shutdown request. Also listed under `removed` or `upgraded`.
    pub forced: Vec<AppId>,
    /// Changes that were never started because the lease stopped being ours.
    pub abandoned: Vec<AppId>,
    pub lease_lost: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    UpToDate,
    Skipped(SkipReason),
    Applied(CycleReport),
}

pub struct Orchestrator {
    options: OrchestratorOptions,
    identity: InstanceIdentity,
    repository: Arc<dyn DeploymentRepository>,
    coordinator: UpdateSessionCoordinator,
    supervisor: ProcessSupervisor,
    events: Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        options: OrchestratorOptions,
        identity: InstanceIdentity,
        repository: Arc<dyn DeploymentRepository>,
        coordinator: UpdateSessionCoordinator,
        supervisor: ProcessSupervisor,
    ) -> Self {
        Self {
            options,
            identity,
            repository,
            coordinator,
            supervisor,
            events: None,
        }
    }

    /// Drain and log these supervisor events while running.
    pub fn with_events(mut self, events: mpsc::UnboundedReceiver<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// One reconciliation cycle.
    pub async fn tick(&self) -> TickOutcome {
        let domain = &self.identity.update_domain;

        let desired = match self.repository.fetch_desired().await {
            Ok(desired) => desired,
            Err(e) => {
                warn!(domain = %domain, error = %e, "deployment repository unavailable; skipping tick");
                return TickOutcome::Skipped(SkipReason::RepositoryUnavailable(e.to_string()));
            }
        };

        let diff = compute_diff(&desired, &self.supervisor.list_deployed());
        if diff.is_empty() {
            debug!(domain = %domain, apps = diff.unchanged.len(), "deployment up to date");
            return TickOutcome::UpToDate;
        }
        info!(
            domain = %domain,
            install = diff.install.len(),
            upgrade = diff.upgrade.len(),
            remove = diff.remove.len(),
            "deployment changes pending"
        );

        let session = match self.coordinator.try_acquire(domain).await {
            Ok(session) => session,
            Err(SessionError::Contended { holder }) => {
                info!(domain = %domain, holder = ?holder, "another update domain is updating; waiting");
                return TickOutcome::Skipped(SkipReason::Contended { holder });
            }
            Err(e) => {
                warn!(domain = %domain, error = %e, "could not reach update session store; skipping tick");
                return TickOutcome::Skipped(SkipReason::Coordination(e.to_string()));
            }
        };

        let renewal = RenewalTask::spawn(self.coordinator.clone(), session);
        let mut report = self.apply(diff, &renewal.halted).await;

        let (session, renew_error) = renewal.finish().await;
        match renew_error {
            Some(SessionError::Lost(id)) => {
                error!(domain = %domain, session = %id, "update session lost during cycle");
                report.lease_lost = true;
            }
            Some(e) => {
                warn!(domain = %domain, error = %e, "update session renewal failed during cycle");
                report.lease_lost = true;
                let _ = self.coordinator.release(session).await;
            }
            None => {
                // Release failures are logged by the coordinator; the lease
                // then simply runs out.
                let _ = self.coordinator.release(session).await;
            }
        }

        TickOutcome::Applied(report)
    }

    /// Removals, then upgrades, then installs, one app at a time.
    async fn apply(&self, diff: DeploymentDiff, halted: &watch::Receiver<bool>) -> CycleReport {
        let mut report = CycleReport::default();
        let is_halted = || *halted.borrow();

        for descriptor in diff.remove {
            let id = descriptor.app_id.clone();
            if is_halted() {
                report.abandoned.push(id);
                continue;
            }
            match self.supervisor.undeploy(&id).await {
                Ok(CloseOutcome::ForcedKill) | Err(DeployError::CloseTimedOut { .. }) => {
                    report.forced.push(id.clone());
                    report.removed.push(id);
                }
                Ok(_) | Err(DeployError::NotDeployed(_)) => report.removed.push(id),
                Err(e) => {
                    warn!(app = %descriptor, error = %e, "removal failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        for upgrade in diff.upgrade {
            let id = upgrade.to.app_id.clone();
            if is_halted() {
                report.abandoned.push(id);
                continue;
            }
            info!(app = %id, from = %upgrade.from.version, to = %upgrade.to.version, "upgrading");
            match self.supervisor.undeploy(&id).await {
                Ok(CloseOutcome::ForcedKill) | Err(DeployError::CloseTimedOut { .. }) => {
                    report.forced.push(id.clone());
                }
                Ok(_) | Err(DeployError::NotDeployed(_)) => {}
                Err(e) => {
                    warn!(app = %upgrade.from, error = %e, "could not stop old version");
                    report.failed.push((id, e.to_string()));
                    continue;
                }
            }
            match self.supervisor.deploy(upgrade.to.clone()).await {
                Ok(()) => report.upgraded.push(id),
                Err(e) => {
                    warn!(app = %upgrade.to, error = %e, "new version failed to deploy");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        for descriptor in diff.install {
            let id = descriptor.app_id.clone();
            if is_halted() {
                report.abandoned.push(id);
                continue;
            }
            match self.supervisor.deploy(descriptor.clone()).await {
                Ok(()) => report.installed.push(id),
                Err(e) => {
                    warn!(app = %descriptor, error = %e, "install failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        report
    }

    /// Tick every `check_for_updates_period` until `shutdown` turns true,
    /// then stop every app.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.events.take();
        let mut interval = tokio::time::interval(self.options.check_for_updates_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            domain = %self.identity.update_domain,
            instance = %self.identity.instance_id,
            cluster = %self.identity.cluster_id,
            period = ?self.options.check_for_updates_period,
            "orchestrator started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.tick().await;
                    if let TickOutcome::Applied(report) = &outcome {
                        info!(
                            removed = report.removed.len(),
                            upgraded = report.upgraded.len(),
                            installed = report.installed.len(),
                            failed = report.failed.len(),
                            forced = report.forced.len(),
                            lease_lost = report.lease_lost,
                            "update cycle finished"
                        );
                    }
                }
                Some(event) = next_event(&mut events) => log_event(&event),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("orchestrator stopping; shutting down applications");
        for (app, result) in self.supervisor.shutdown_all().await {
            match result {
                Ok(outcome) => debug!(app = %app, outcome = ?outcome, "stopped"),
                Err(e) => warn!(app = %app, error = %e, "failed to stop"),
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> OrchestratorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = self.supervisor.clone();
        let task = tokio::spawn(self.run(shutdown_rx));
        OrchestratorHandle {
            shutdown_tx,
            task,
            supervisor,
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
) -> Option<SupervisorEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn log_event(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::Restarted {
            app,
            version,
            restart_count,
        } => info!(app = %app, version = %version, restart_count, "application restarted"),
        SupervisorEvent::AppFailed { app, version, ceiling } => {
            error!(app = %app, version = %version, ceiling, "application failed permanently")
        }
        SupervisorEvent::ForceStopped { app, version } => {
            warn!(app = %app, version = %version, "application had to be killed to stop")
        }
    }
}

/// Renews the lease in the background while a cycle applies changes.
struct RenewalTask {
    halted: watch::Receiver<bool>,
    stop: oneshot::Sender<()>,
    session: Arc<Mutex<UpdateSession>>,
    task: JoinHandle<Option<SessionError>>,
}

impl RenewalTask {
    fn spawn(coordinator: UpdateSessionCoordinator, session: UpdateSession) -> Self {
        let (halt_tx, halted) = watch::channel(false);
        let (stop, mut stop_rx) = oneshot::channel();
        let period = coordinator.renew_interval();
        let session = Arc::new(Mutex::new(session));
        let shared = Arc::clone(&session);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return None,
                    _ = ticker.tick() => {
                        let mut session = shared.lock().await;
                        if let Err(e) = coordinator.renew(&mut session).await {
                            let _ = halt_tx.send(true);
                            return Some(e);
                        }
                    }
                }
            }
        });

        Self {
            halted,
            stop,
            session,
            task,
        }
    }

    async fn finish(self) -> (UpdateSession, Option<SessionError>) {
        let _ = self.stop.send(());
        let renew_error = match self.task.await {
            Ok(result) => result,
            Err(e) => Some(SessionError::Coordination(format!("lease renewal task failed: {e}"))),
        };
        let session = self.session.lock().await.clone();
        (session, renew_error)
    }
}

/// Handle returned by [`crate::start`].
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    supervisor: ProcessSupervisor,
}

impl OrchestratorHandle {
    /// Ask the loop to stop after its current tick.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the loop and the final application shutdown to finish.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| RolldError::Other(anyhow::anyhow!("orchestrator task failed: {e}")))
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }
}
