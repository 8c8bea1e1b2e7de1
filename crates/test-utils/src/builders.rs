#![allow(dead_code)]

use std::path::PathBuf;

use rolld::config::model::{InstanceSection, RawRolldConfig, StorageSection, UpdateSection};
use rolld::config::RolldConfig;
use rolld::types::{AppDescriptor, InstanceIdentity, UpdateDomain};
use semver::Version;

/// Builder for a validated [`RolldConfig`] with every required field filled.
pub struct RolldConfigBuilder {
    config: RawRolldConfig,
}

impl RolldConfigBuilder {
    pub fn new(cluster_id: &str, update_domain: &str) -> Self {
        Self {
            config: RawRolldConfig {
                instance: InstanceSection {
                    cluster_id: Some(cluster_id.to_string()),
                    update_domain: Some(update_domain.to_string()),
                    instance_id: Some(format!("{cluster_id}-{update_domain}")),
                    local_store_path: None,
                },
                update: UpdateSection::default(),
                storage: StorageSection {
                    deployment_repository: Some(PathBuf::from("deployments.toml")),
                    update_session_store: Some(PathBuf::from("sessions")),
                },
                cluster_properties: Default::default(),
            },
        }
    }

    pub fn with_local_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.instance.local_store_path = Some(path.into());
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.config
            .cluster_properties
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_restart_count(mut self, count: u32) -> Self {
        self.config.update.application_restart_count = count;
        self
    }

    pub fn with_update(mut self, update: UpdateSection) -> Self {
        self.config.update = update;
        self
    }

    pub fn raw(self) -> RawRolldConfig {
        self.config
    }

    pub fn build(self) -> RolldConfig {
        RolldConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for [`AppDescriptor`].
pub struct DescriptorBuilder {
    descriptor: AppDescriptor,
}

impl DescriptorBuilder {
    pub fn new(id: &str, version: &str) -> Self {
        let version = Version::parse(version).expect("test version must be valid semver");
        Self {
            descriptor: AppDescriptor::new(id, version, format!("apps/{id}/{id}")),
        }
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor.binary_location = path.into();
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.descriptor.args.push(arg.to_string());
        self
    }

    pub fn graceful(mut self, graceful: bool) -> Self {
        self.descriptor.graceful_shutdown = graceful;
        self
    }

    pub fn build(self) -> AppDescriptor {
        self.descriptor
    }
}

/// Shorthand for `DescriptorBuilder::new(id, version).build()`.
pub fn descriptor(id: &str, version: &str) -> AppDescriptor {
    DescriptorBuilder::new(id, version).build()
}

pub fn identity(cluster_id: &str, update_domain: &str) -> InstanceIdentity {
    InstanceIdentity {
        cluster_id: cluster_id.to_string(),
        update_domain: UpdateDomain::new(update_domain),
        instance_id: format!("{cluster_id}-{update_domain}"),
        local_store_path: PathBuf::from("./LocalStore"),
    }
}
