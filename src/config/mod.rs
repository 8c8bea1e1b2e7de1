// src/config/mod.rs

//! Configuration loading and validation for rolld.
//!
//! - `model.rs`: the TOML-backed data model and CLI overrides.
//! - `loader.rs`: reading a config file and resolving paths.
//! - `validate.rs`: turning the raw model into a [`RolldConfig`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_config_path, load_and_validate, load_from_path, load_if_present, load_with_overrides,
};
pub use model::{ConfigOverrides, RawRolldConfig, RolldConfig};
pub use validate::parse_cluster_properties;
