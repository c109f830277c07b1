//! Integration tests for environment resolution and manifests.

use keel_config::{
    resolve, DatabaseSpec, DeploymentManifest, EnvironmentTable, SafetyTier, StageName,
};
use tempfile::tempdir;

#[test]
fn test_every_known_stage_resolves_to_itself() {
    for stage in StageName::all() {
        let config = resolve(stage.as_str());
        assert_eq!(config.stage, stage);
        assert_eq!(config.tier(), stage.tier());
    }
}

#[test]
fn test_unknown_stage_returns_same_default_every_time() {
    let table = EnvironmentTable::standard();
    let first = table.resolve("does-not-exist");
    let second = table.resolve("also-unknown");
    assert_eq!(first, second);
    assert_eq!(first.stage, table.default_stage());
}

#[test]
fn test_tiers_differ_on_protective_settings() {
    let dev = resolve("dev");
    let prod = resolve("prod");

    assert_eq!(dev.tier(), SafetyTier::Disposable);
    assert_eq!(prod.tier(), SafetyTier::Protected);
    assert!(prod.database.allocated_storage_gb > dev.database.allocated_storage_gb);
    assert_ne!(dev.database.multi_az, prod.database.multi_az);
    assert_ne!(
        dev.database.deletion_protection,
        prod.database.deletion_protection
    );
    assert_ne!(dev.vpc.cidr, prod.vpc.cidr);
}

#[test]
fn test_manifest_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("keel.yaml");

    let mut manifest = DeploymentManifest::default().with_image("sha256:abc");
    manifest.stages = vec!["dev".to_string(), "prod".to_string()];
    manifest.databases.push(DatabaseSpec {
        allocated_storage_gb: Some(10),
        ..DatabaseSpec::new("reports")
    });
    manifest.to_file(&path).unwrap();

    let loaded = DeploymentManifest::from_file(&path).unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.database("reports").unwrap().allocated_storage_gb, Some(10));
}

#[test]
fn test_manifest_rejects_bad_app_name() {
    let yaml = r#"
app: "Bad Name"
workload:
  function_name: fn
"#;
    assert!(DeploymentManifest::from_yaml(yaml).is_err());
}
