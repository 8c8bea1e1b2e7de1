use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use rolld::deployment::{DeploymentRepository, Placement, TomlDeploymentRepository};
use rolld::errors::RepositoryError;
use rolld::fs::mock::MockFileSystem;
use rolld::fs::RealFileSystem;
use semver::Version;

const MANIFEST: &str = r#"
[[app]]
id = "hello"
version = "1.2.0"
binary = "apps/hello/1.2.0/hello"
args = ["--port", "8080"]

[[app]]
id = "east-only"
version = "0.3.1"
binary = "apps/east-only/east-only"
graceful_shutdown = false
target_clusters = ["prod-east"]

[[app]]
id = "gold-tier"
version = "2.0.0"
binary = "/opt/gold/gold"

[app.required_properties]
tier = "gold"
"#;

fn placement(cluster: &str, props: &[(&str, &str)]) -> Placement {
    let props: BTreeMap<String, String> = props
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Placement::new(cluster, props)
}

fn repository(fs: &MockFileSystem, placement: Placement) -> TomlDeploymentRepository {
    TomlDeploymentRepository::new(Arc::new(fs.clone()), "/repo/deployments.toml", placement)
}

fn ids(descriptors: &[rolld::types::AppDescriptor]) -> Vec<&str> {
    descriptors.iter().map(|d| d.app_id.as_str()).collect()
}

#[tokio::test]
async fn manifest_entries_become_descriptors() {
    let fs = MockFileSystem::new();
    fs.add_file("/repo/deployments.toml", MANIFEST);
    let repo = repository(&fs, placement("prod-east", &[("tier", "gold")]));

    let desired = repo.fetch_desired().await.unwrap();

    assert_eq!(ids(&desired), vec!["hello", "east-only", "gold-tier"]);
    let hello = &desired[0];
    assert_eq!(hello.version, Version::new(1, 2, 0));
    assert_eq!(hello.binary_location, PathBuf::from("apps/hello/1.2.0/hello"));
    assert_eq!(hello.args, vec!["--port", "8080"]);
    assert!(hello.graceful_shutdown);
    assert!(!desired[1].graceful_shutdown);
}

#[tokio::test]
async fn entries_for_other_clusters_or_properties_are_filtered() {
    let fs = MockFileSystem::new();
    fs.add_file("/repo/deployments.toml", MANIFEST);

    let west = repository(&fs, placement("prod-west", &[("tier", "silver")]));
    assert_eq!(ids(&west.fetch_desired().await.unwrap()), vec!["hello"]);

    let east_silver = repository(&fs, placement("prod-east", &[("tier", "silver")]));
    assert_eq!(
        ids(&east_silver.fetch_desired().await.unwrap()),
        vec!["hello", "east-only"]
    );
}

#[tokio::test]
async fn unreadable_manifest_is_a_read_error() {
    let fs = MockFileSystem::new();
    fs.add_file("/repo/deployments.toml", MANIFEST);
    fs.set_failing(true);
    let repo = repository(&fs, placement("prod-east", &[]));

    assert!(matches!(repo.fetch_desired().await, Err(RepositoryError::Read(_))));

    let missing = TomlDeploymentRepository::new(
        Arc::new(MockFileSystem::new()),
        "/repo/deployments.toml",
        placement("prod-east", &[]),
    );
    assert!(matches!(missing.fetch_desired().await, Err(RepositoryError::Read(_))));
}

#[tokio::test]
async fn malformed_manifest_is_a_parse_error() {
    let fs = MockFileSystem::new();
    fs.add_file("/repo/deployments.toml", "[[app]]\nid = 3\n");
    let repo = repository(&fs, placement("prod-east", &[]));

    assert!(matches!(repo.fetch_desired().await, Err(RepositoryError::Parse(_))));
}

#[tokio::test]
async fn reads_manifest_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployments.toml");
    std::fs::write(&path, MANIFEST).unwrap();

    let repo = TomlDeploymentRepository::new(
        Arc::new(RealFileSystem),
        path,
        placement("prod-west", &[]),
    );
    assert_eq!(ids(&repo.fetch_desired().await.unwrap()), vec!["hello"]);
}
