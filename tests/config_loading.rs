use std::fs;
use std::path::Path;
use std::time::Duration;

use rolld::config::model::UpdateSection;
use rolld::config::{
    load_and_validate, load_if_present, load_with_overrides, ConfigOverrides, RolldConfig,
};
use rolld::errors::RolldError;
use rolld_test_utils::builders::RolldConfigBuilder;
use tempfile::TempDir;

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("rolld.toml");
    fs::write(&path, contents).unwrap();
    path
}

const MINIMAL: &str = r#"
[instance]
cluster_id = "prod-east"
update_domain = "1"
instance_id = "host-a"

[storage]
deployment_repository = "deployments.toml"
update_session_store = "sessions"
"#;

fn expect_config_error(result: rolld::errors::Result<RolldConfig>, needle: &str) {
    match result {
        Err(RolldError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "error '{msg}' should mention '{needle}'")
        }
        other => panic!("expected a config error mentioning '{needle}', got {other:?}"),
    }
}

#[test]
fn minimal_config_gets_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), MINIMAL);

    let config = load_and_validate(&path).unwrap();

    assert_eq!(config.identity.cluster_id, "prod-east");
    assert_eq!(config.identity.update_domain.as_str(), "1");
    assert_eq!(config.identity.instance_id, "host-a");
    assert_eq!(config.identity.local_store_path, Path::new("./LocalStore"));
    assert_eq!(config.check_for_updates_period, Duration::from_secs(10));
    assert_eq!(config.application_restart_count, 3);
    assert_eq!(config.graceful_shutdown_timeout, Duration::from_secs(30));
    assert_eq!(config.lease_duration, Duration::from_secs(60));
    assert_eq!(config.storage_timeout, Duration::from_secs(10));
    assert!(config.cluster_properties.is_empty());
}

#[test]
fn storage_paths_resolve_against_config_dir() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), MINIMAL);

    let config = load_and_validate(&path).unwrap();

    assert_eq!(config.deployment_repository, dir.path().join("deployments.toml"));
    assert_eq!(config.update_session_store, dir.path().join("sessions"));
}

#[test]
fn overrides_win_over_file_values() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        &format!("{MINIMAL}\n[cluster_properties]\nregion = \"east\"\ntier = \"gold\"\n"),
    );
    let overrides = ConfigOverrides {
        cluster_id: Some("qa".to_string()),
        update_domain: Some("7".to_string()),
        check_for_updates_period: Some(3),
        application_restart_count: Some(0),
        cluster_properties: [("region".to_string(), "west".to_string())].into(),
        ..ConfigOverrides::default()
    };

    let config = load_with_overrides(&path, &overrides).unwrap();

    assert_eq!(config.identity.cluster_id, "qa");
    assert_eq!(config.identity.update_domain.as_str(), "7");
    assert_eq!(config.identity.instance_id, "host-a");
    assert_eq!(config.check_for_updates_period, Duration::from_secs(3));
    assert_eq!(config.application_restart_count, 0);
    assert_eq!(config.cluster_properties["region"], "west");
    assert_eq!(config.cluster_properties["tier"], "gold");
}

#[test]
fn missing_required_fields_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[instance]
update_domain = "1"
instance_id = "host-a"

[storage]
deployment_repository = "d.toml"
update_session_store = "s"
"#,
    );
    expect_config_error(load_and_validate(&path), "cluster_id");

    let path = write_config(
        dir.path(),
        r#"
[instance]
cluster_id = "c"
update_domain = "1"
instance_id = "host-a"

[storage]
deployment_repository = "d.toml"
"#,
    );
    expect_config_error(load_and_validate(&path), "update_session_store");
}

#[test]
fn blank_update_domain_is_rejected() {
    let raw = RolldConfigBuilder::new("c", "1").raw();
    let mut raw = raw;
    raw.instance.update_domain = Some("   ".to_string());
    expect_config_error(RolldConfig::try_from(raw), "update_domain");
}

#[test]
fn zero_durations_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        &format!("{MINIMAL}\n[update]\ncheck_for_updates_period = 0\n"),
    );
    expect_config_error(load_and_validate(&path), "check_for_updates_period");
}

#[test]
fn lease_must_outlast_storage_timeout() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        &format!("{MINIMAL}\n[update]\nlease_duration = 10\nstorage_timeout = 10\n"),
    );
    expect_config_error(load_and_validate(&path), "lease_duration");
}

#[test]
fn unknown_keys_are_toml_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), &format!("{MINIMAL}\n[update]\nretries = 4\n"));
    assert!(matches!(load_and_validate(&path), Err(RolldError::TomlError(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        load_and_validate(dir.path().join("nope.toml")),
        Err(RolldError::IoError(_))
    ));
}

#[test]
fn builder_produces_valid_config() {
    let config = RolldConfigBuilder::new("c", "2")
        .with_local_store("/srv/apps")
        .with_update(UpdateSection {
            lease_duration: 120,
            ..UpdateSection::default()
        })
        .with_property("region", "east")
        .with_restart_count(5)
        .build();
    assert_eq!(config.identity.update_domain.as_str(), "2");
    assert_eq!(config.identity.local_store_path, Path::new("/srv/apps"));
    assert_eq!(config.lease_duration, Duration::from_secs(120));
    assert_eq!(config.application_restart_count, 5);
}

fn flags_only() -> ConfigOverrides {
    ConfigOverrides {
        cluster_id: Some("prod-west".to_string()),
        update_domain: Some("3".to_string()),
        instance_id: Some("host-z".to_string()),
        deployment_repository: Some("repo/deployments.toml".into()),
        update_session_store: Some("/var/lib/rolld/sessions".into()),
        ..ConfigOverrides::default()
    }
}

#[test]
fn flags_alone_configure_the_host_when_no_file_exists() {
    let dir = TempDir::new().unwrap();
    let absent = dir.path().join("rolld.toml");

    let config = load_if_present(&absent, &flags_only()).unwrap();

    assert_eq!(config.identity.cluster_id, "prod-west");
    assert_eq!(config.identity.update_domain.as_str(), "3");
    assert_eq!(config.identity.instance_id, "host-z");
    assert_eq!(config.check_for_updates_period, Duration::from_secs(10));
    assert_eq!(config.deployment_repository, dir.path().join("repo/deployments.toml"));
    assert_eq!(config.update_session_store, Path::new("/var/lib/rolld/sessions"));
}

#[test]
fn missing_file_without_flags_names_the_missing_setting() {
    let dir = TempDir::new().unwrap();
    let overrides = ConfigOverrides {
        deployment_repository: None,
        ..flags_only()
    };
    expect_config_error(
        load_if_present(dir.path().join("rolld.toml"), &overrides),
        "deployment_repository",
    );
}

#[test]
fn existing_file_is_still_read_and_storage_flags_win() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), MINIMAL);
    let overrides = ConfigOverrides {
        update_session_store: Some("shared/sessions".into()),
        ..ConfigOverrides::default()
    };

    let config = load_if_present(&path, &overrides).unwrap();

    assert_eq!(config.identity.cluster_id, "prod-east");
    assert_eq!(config.deployment_repository, dir.path().join("deployments.toml"));
    assert_eq!(config.update_session_store, dir.path().join("shared/sessions"));
}
