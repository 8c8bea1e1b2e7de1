// src/deployment/memory.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::deployment::DeploymentRepository;
use crate::errors::RepositoryError;
use crate::process::BoxFuture;
use crate::types::AppDescriptor;

/// Repository holding a desired set in memory. Tests and embedders swap the
/// set with [`set`](Self::set) between ticks.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentRepository {
    desired: Mutex<Vec<AppDescriptor>>,
    unavailable: AtomicBool,
}

impl InMemoryDeploymentRepository {
    pub fn new(desired: Vec<AppDescriptor>) -> Self {
        Self {
            desired: Mutex::new(desired),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set(&self, desired: Vec<AppDescriptor>) {
        *self.desired.lock().unwrap_or_else(PoisonError::into_inner) = desired;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl DeploymentRepository for InMemoryDeploymentRepository {
    fn fetch_desired(&self) -> BoxFuture<'_, Result<Vec<AppDescriptor>, RepositoryError>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(RepositoryError::Read("repository switched off".to_string()));
            }
            Ok(self
                .desired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone())
        })
    }
}
