// src/orchestrator/diff.rs

//! Pure desired-vs-deployed comparison.
//!
//! No Tokio, no IO. The runtime feeds in what the repository wants and what
//! the supervisor runs, and applies the resulting [`DeploymentDiff`].

use std::collections::BTreeMap;

use crate::types::{AppDescriptor, AppId};

/// One app id moving from one version to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub from: AppDescriptor,
    pub to: AppDescriptor,
}

/// Every app id from either side lands in exactly one bucket. Each bucket is
/// ordered by app id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentDiff {
    pub unchanged: Vec<AppDescriptor>,
    pub install: Vec<AppDescriptor>,
    pub upgrade: Vec<Upgrade>,
    pub remove: Vec<AppDescriptor>,
}

impl DeploymentDiff {
    /// True when nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.upgrade.is_empty() && self.remove.is_empty()
    }

    /// Number of app ids that would be touched.
    pub fn change_count(&self) -> usize {
        self.install.len() + self.upgrade.len() + self.remove.len()
    }
}

/// Classify every app id.
///
/// When `desired` lists an app id more than once, the highest version wins.
/// An app whose version matches is unchanged even if its binary or args
/// differ: a version is immutable once published.
pub fn compute_diff(desired: &[AppDescriptor], deployed: &[AppDescriptor]) -> DeploymentDiff {
    let mut wanted: BTreeMap<&AppId, &AppDescriptor> = BTreeMap::new();
    for descriptor in desired {
        wanted
            .entry(&descriptor.app_id)
            .and_modify(|current| {
                if descriptor.version > current.version {
                    *current = descriptor;
                }
            })
            .or_insert(descriptor);
    }

    let running: BTreeMap<&AppId, &AppDescriptor> =
        deployed.iter().map(|d| (&d.app_id, d)).collect();

    let mut diff = DeploymentDiff::default();

    for (id, want) in &wanted {
        match running.get(id) {
            None => diff.install.push((*want).clone()),
            Some(have) if have.version == want.version => diff.unchanged.push((*have).clone()),
            Some(have) => diff.upgrade.push(Upgrade {
                from: (*have).clone(),
                to: (*want).clone(),
            }),
        }
    }

    diff.remove = running
        .iter()
        .filter(|(id, _)| !wanted.contains_key(*id))
        .map(|(_, have)| (*have).clone())
        .collect();

    diff
}
