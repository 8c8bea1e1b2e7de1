// src/deployment/placement.rs

use std::collections::BTreeMap;

/// Where this instance sits, as far as deployment targeting is concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub cluster_id: String,
    pub cluster_properties: BTreeMap<String, String>,
}

impl Placement {
    pub fn new(cluster_id: impl Into<String>, cluster_properties: BTreeMap<String, String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cluster_properties,
        }
    }

    /// An entry is admitted when it targets every cluster or names ours, and
    /// each of its required properties is present here with the same value.
    pub fn admits(&self, target_clusters: &[String], required: &BTreeMap<String, String>) -> bool {
        let cluster_ok =
            target_clusters.is_empty() || target_clusters.iter().any(|c| *c == self.cluster_id);

        cluster_ok
            && required
                .iter()
                .all(|(key, value)| self.cluster_properties.get(key) == Some(value))
    }
}
