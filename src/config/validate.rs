// src/config/validate.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{RawRolldConfig, RolldConfig};
use crate::errors::{Result, RolldError};
use crate::types::{InstanceIdentity, UpdateDomain};

impl TryFrom<RawRolldConfig> for RolldConfig {
    type Error = RolldError;

    fn try_from(raw: RawRolldConfig) -> std::result::Result<Self, Self::Error> {
        let cluster_id = required(raw.instance.cluster_id, "[instance].cluster_id")?;
        let update_domain: UpdateDomain = required(raw.instance.update_domain, "[instance].update_domain")?
            .parse()
            .map_err(RolldError::ConfigError)?;
        let instance_id = match raw.instance.instance_id {
            Some(id) => required(Some(id), "[instance].instance_id")?,
            None => std::env::var("HOSTNAME")
                .ok()
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| {
                    RolldError::ConfigError(
                        "[instance].instance_id is not set and HOSTNAME is empty".to_string(),
                    )
                })?,
        };
        let local_store_path = raw
            .instance
            .local_store_path
            .unwrap_or_else(|| PathBuf::from("./LocalStore"));

        let update = &raw.update;
        let check_for_updates_period =
            seconds(update.check_for_updates_period, "[update].check_for_updates_period")?;
        let graceful_shutdown_timeout =
            seconds(update.graceful_shutdown_timeout, "[update].graceful_shutdown_timeout")?;
        let lease_duration = seconds(update.lease_duration, "[update].lease_duration")?;
        let storage_timeout = seconds(update.storage_timeout, "[update].storage_timeout")?;

        if lease_duration <= storage_timeout {
            return Err(RolldError::ConfigError(format!(
                "[update].lease_duration ({}s) must be greater than [update].storage_timeout ({}s)",
                update.lease_duration, update.storage_timeout
            )));
        }

        let deployment_repository = raw
            .storage
            .deployment_repository
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| missing("[storage].deployment_repository"))?;
        let update_session_store = raw
            .storage
            .update_session_store
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| missing("[storage].update_session_store"))?;

        for key in raw.cluster_properties.keys() {
            if key.trim().is_empty() {
                return Err(RolldError::ConfigError(
                    "[cluster_properties] keys must not be empty".to_string(),
                ));
            }
        }

        Ok(RolldConfig {
            identity: InstanceIdentity {
                cluster_id,
                update_domain,
                instance_id,
                local_store_path,
            },
            check_for_updates_period,
            application_restart_count: update.application_restart_count,
            graceful_shutdown_timeout,
            lease_duration,
            storage_timeout,
            deployment_repository,
            update_session_store,
            cluster_properties: raw.cluster_properties,
        })
    }
}

fn missing(field: &str) -> RolldError {
    RolldError::ConfigError(format!("{field} is required"))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(RolldError::ConfigError(format!("{field} must not be empty"))),
        None => Err(missing(field)),
    }
}

fn seconds(value: u64, field: &str) -> Result<Duration> {
    if value == 0 {
        return Err(RolldError::ConfigError(format!("{field} must be >= 1 second (got 0)")));
    }
    Ok(Duration::from_secs(value))
}

/// Parse `--cluster-properties "region=east,tier=gold"`.
pub fn parse_cluster_properties(s: &str) -> Result<BTreeMap<String, String>> {
    let mut properties = BTreeMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            RolldError::ConfigError(format!("cluster property '{pair}' is not of the form key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RolldError::ConfigError(format!(
                "cluster property '{pair}' has an empty key"
            )));
        }
        properties.insert(key.to_string(), value.trim().to_string());
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_properties_parse_pairs() {
        let props = parse_cluster_properties("region=east, tier = gold,").unwrap();
        assert_eq!(props.get("region").map(String::as_str), Some("east"));
        assert_eq!(props.get("tier").map(String::as_str), Some("gold"));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn cluster_properties_reject_bare_words() {
        assert!(parse_cluster_properties("region").is_err());
        assert!(parse_cluster_properties("=east").is_err());
    }

    #[test]
    fn zero_seconds_is_rejected() {
        assert!(seconds(0, "x").is_err());
        assert_eq!(seconds(3, "x").unwrap(), Duration::from_secs(3));
    }
}
