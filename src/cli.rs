// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::model::ConfigOverrides;
use crate::config::validate::parse_cluster_properties;
use crate::errors::Result;

/// Command-line arguments for `rolld`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rolld",
    version,
    about = "Host long-running applications and roll out new versions one update domain at a time.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). Without it, `rolld.toml` in the
    /// working directory is read if it exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override `[instance].cluster_id`.
    #[arg(long, value_name = "ID")]
    pub cluster_id: Option<String>,

    /// Override `[instance].update_domain`.
    #[arg(long, value_name = "DOMAIN")]
    pub update_domain: Option<String>,

    /// Override `[instance].instance_id`.
    #[arg(long, value_name = "ID")]
    pub instance_id: Option<String>,

    /// Override `[update].check_for_updates_period`, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub update_frequency: Option<u64>,

    /// Override `[update].application_restart_count`.
    #[arg(long, value_name = "COUNT")]
    pub application_restart_count: Option<u32>,

    /// Override `[storage].deployment_repository`.
    #[arg(long, value_name = "PATH")]
    pub deployment_repository: Option<PathBuf>,

    /// Override `[storage].update_session_store`.
    #[arg(long, value_name = "DIR")]
    pub update_session_store: Option<PathBuf>,

    /// Extra cluster properties, `key=value` pairs separated by commas.
    #[arg(long, value_name = "PAIRS")]
    pub cluster_properties: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ROLLD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the resolved config and desired deployment set, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Run a single update cycle, stop every app and exit.
    #[arg(long)]
    pub once: bool,
}

impl CliArgs {
    pub fn overrides(&self) -> Result<ConfigOverrides> {
        let cluster_properties = match &self.cluster_properties {
            Some(pairs) => parse_cluster_properties(pairs)?,
            None => Default::default(),
        };
        Ok(ConfigOverrides {
            cluster_id: self.cluster_id.clone(),
            update_domain: self.update_domain.clone(),
            instance_id: self.instance_id.clone(),
            check_for_updates_period: self.update_frequency,
            application_restart_count: self.application_restart_count,
            deployment_repository: self.deployment_repository.clone(),
            update_session_store: self.update_session_store.clone(),
            cluster_properties,
        })
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
