// src/lib.rs

pub mod cli;
pub mod config;
pub mod deployment;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod session;
pub mod supervisor;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_if_present, load_with_overrides};
use crate::config::model::RolldConfig;
use crate::deployment::{DeploymentRepository, Placement, TomlDeploymentRepository};
use crate::errors::Result;
use crate::fs::RealFileSystem;
use crate::orchestrator::{Orchestrator, OrchestratorHandle, OrchestratorOptions, TickOutcome};
use crate::process::OsProcessFactory;
use crate::session::{
    CoordinatorOptions, FileSessionStore, SystemClock, UpdateSessionCoordinator, UpdateSessionStore,
};
use crate::supervisor::{ProcessSupervisor, RelaunchBackoff, SupervisorOptions};

/// Slack on top of the graceful timeout before the supervisor gives up on a
/// close and kills the process itself.
const CLOSE_GRACE_MARGIN: Duration = Duration::from_secs(5);

/// Resolved configuration in, running orchestrator out.
pub fn start(
    config: RolldConfig,
    repository: Arc<dyn DeploymentRepository>,
    store: Arc<dyn UpdateSessionStore>,
) -> OrchestratorHandle {
    build_orchestrator(config, repository, store).spawn()
}

fn build_orchestrator(
    config: RolldConfig,
    repository: Arc<dyn DeploymentRepository>,
    store: Arc<dyn UpdateSessionStore>,
) -> Orchestrator {
    let factory = Arc::new(OsProcessFactory::new(
        config.identity.clone(),
        config.graceful_shutdown_timeout,
    ));
    let (supervisor, events) = ProcessSupervisor::new(
        factory,
        SupervisorOptions {
            restart_ceiling: config.application_restart_count,
            close_timeout: config.graceful_shutdown_timeout + CLOSE_GRACE_MARGIN,
            relaunch_backoff: RelaunchBackoff::default(),
        },
    );
    let coordinator = UpdateSessionCoordinator::new(
        store,
        config.identity.cluster_id.clone(),
        config.identity.instance_id.clone(),
        Arc::new(SystemClock),
        CoordinatorOptions {
            lease_duration: config.lease_duration,
            storage_timeout: config.storage_timeout,
        },
    );

    Orchestrator::new(
        OrchestratorOptions {
            check_for_updates_period: config.check_for_updates_period,
        },
        config.identity,
        repository,
        coordinator,
        supervisor,
    )
    .with_events(events)
}

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let overrides = args.overrides()?;
    let config = match &args.config {
        Some(path) => load_with_overrides(path, &overrides)?,
        None => load_if_present(default_config_path(), &overrides)?,
    };

    let fs = Arc::new(RealFileSystem);
    let placement = Placement::new(
        config.identity.cluster_id.clone(),
        config.cluster_properties.clone(),
    );
    let repository: Arc<dyn DeploymentRepository> = Arc::new(TomlDeploymentRepository::new(
        fs.clone(),
        config.deployment_repository.clone(),
        placement,
    ));

    if args.dry_run {
        print_dry_run(&config, repository.as_ref()).await?;
        return Ok(());
    }

    let store: Arc<dyn UpdateSessionStore> = Arc::new(FileSessionStore::new(
        fs,
        config.update_session_store.clone(),
        Arc::new(SystemClock),
    ));

    if args.once {
        let orchestrator = build_orchestrator(config, repository, store);
        let outcome = orchestrator.tick().await;
        info!(outcome = ?outcome, "single update cycle finished");
        if let TickOutcome::Applied(report) = &outcome {
            for (app, error) in &report.failed {
                warn!(app = %app, error = %error, "change failed");
            }
        }
        orchestrator.supervisor().shutdown_all().await;
        return Ok(());
    }

    let handle = start(config, repository, store);
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; stopping");
    }
    info!("shutdown requested");
    handle.shutdown();
    handle.join().await
}

/// Print the resolved config and the desired set for this instance.
async fn print_dry_run(config: &RolldConfig, repository: &dyn DeploymentRepository) -> Result<()> {
    let identity = &config.identity;
    println!("rolld dry-run");
    println!("  instance.cluster_id = {}", identity.cluster_id);
    println!("  instance.update_domain = {}", identity.update_domain);
    println!("  instance.instance_id = {}", identity.instance_id);
    println!("  instance.local_store_path = {}", identity.local_store_path.display());
    println!("  update.check_for_updates_period = {:?}", config.check_for_updates_period);
    println!("  update.application_restart_count = {}", config.application_restart_count);
    println!("  update.graceful_shutdown_timeout = {:?}", config.graceful_shutdown_timeout);
    println!("  update.lease_duration = {:?}", config.lease_duration);
    println!("  update.storage_timeout = {:?}", config.storage_timeout);
    println!("  storage.deployment_repository = {}", config.deployment_repository.display());
    println!("  storage.update_session_store = {}", config.update_session_store.display());
    for (key, value) in &config.cluster_properties {
        println!("  cluster_properties.{key} = {value}");
    }
    println!();

    let desired = repository.fetch_desired().await?;
    println!("desired apps ({}):", desired.len());
    for descriptor in &desired {
        println!("  - {descriptor}");
        println!(
            "      binary: {}",
            descriptor.resolve_binary(&identity.local_store_path).display()
        );
        if !descriptor.args.is_empty() {
            println!("      args: {:?}", descriptor.args);
        }
        if !descriptor.graceful_shutdown {
            println!("      graceful_shutdown: false");
        }
    }

    debug!("dry-run complete (nothing started)");
    Ok(())
}
