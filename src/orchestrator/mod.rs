// src/orchestrator/mod.rs

//! Version reconciliation for one instance.
//!
//! The pure comparison lives in [`diff`]; the async loop that takes the
//! update session and applies changes is in [`runtime`].

pub mod diff;
pub mod runtime;

pub use diff::{compute_diff, DeploymentDiff, Upgrade};
pub use runtime::{
    CycleReport, Orchestrator, OrchestratorHandle, OrchestratorOptions, SkipReason, TickOutcome,
};
