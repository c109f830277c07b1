//! Declarative deployment manifest (`keel.yaml`).

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Default manifest file name looked up by the CLI.
pub const MANIFEST_FILE: &str = "keel.yaml";

/// What to deploy, independent of the environment it lands in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    /// Application name, used as a prefix for physical names.
    pub app: String,
    /// Stages to compose when none is selected explicitly.
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,
    pub workload: WorkloadSpec,
    #[serde(default)]
    pub databases: Vec<DatabaseSpec>,
    /// Overrides the environment's fallback alert address.
    #[serde(default)]
    pub alert_email: Option<String>,
}

/// The containerized compute workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub function_name: String,
    /// Existing registry repository. When absent the stage gets its own.
    #[serde(default)]
    pub repository: Option<String>,
    /// Image tag or `sha256:` digest.
    #[serde(default)]
    pub image: Option<String>,
    /// Name of the database (from `databases`) the function talks to.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub canary: bool,
    #[serde(default)]
    pub cors_allow_origins: Option<Vec<String>>,
    #[serde(default)]
    pub cors_allow_headers: Option<Vec<String>>,
}

/// One logical database inside the stage's database stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub allocated_storage_gb: Option<u32>,
    #[serde(default)]
    pub instance_class: Option<String>,
    #[serde(default)]
    pub multi_az: Option<bool>,
}

impl DatabaseSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_name: None,
            username: None,
            allocated_storage_gb: None,
            instance_class: None,
            multi_az: None,
        }
    }
}

fn default_stages() -> Vec<String> {
    vec!["dev".to_string()]
}

impl Default for DeploymentManifest {
    fn default() -> Self {
        Self {
            app: "keel".to_string(),
            stages: default_stages(),
            workload: WorkloadSpec {
                function_name: "keel_demo".to_string(),
                repository: None,
                image: None,
                database: Some("demo".to_string()),
                canary: false,
                cors_allow_origins: None,
                cors_allow_headers: None,
            },
            databases: vec![DatabaseSpec {
                db_name: Some("keel_demo".to_string()),
                ..DatabaseSpec::new("demo")
            }],
            alert_email: None,
        }
    }
}

impl DeploymentManifest {
    /// Parse a manifest from YAML text and validate it.
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        let manifest: DeploymentManifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest from a YAML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        debug!("Reading deployment manifest from {:?}", path);
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Save the manifest to a YAML file.
    pub fn to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Replace the workload image reference.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.workload.image = Some(image.into());
        self
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseSpec> {
        self.databases.iter().find(|db| db.name == name)
    }

    /// Structural checks that do not depend on the environment.
    pub fn validate(&self) -> ConfigResult<()> {
        if !is_identifier(&self.app) {
            return Err(ConfigError::InvalidManifest(format!(
                "app name '{}' must be lowercase alphanumeric or '-'",
                self.app
            )));
        }
        if self.workload.function_name.trim().is_empty() {
            return Err(ConfigError::InvalidManifest(
                "workload.function_name is empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for db in &self.databases {
            if !is_identifier(&db.name) {
                return Err(ConfigError::InvalidManifest(format!(
                    "database name '{}' must be lowercase alphanumeric or '-'",
                    db.name
                )));
            }
            if !seen.insert(db.name.as_str()) {
                return Err(ConfigError::InvalidManifest(format!(
                    "duplicate database '{}'",
                    db.name
                )));
            }
        }

        if let Some(bound) = &self.workload.database {
            if self.database(bound).is_none() {
                return Err(ConfigError::InvalidManifest(format!(
                    "workload.database '{}' is not declared under databases",
                    bound
                )));
            }
        }

        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest_is_valid() {
        DeploymentManifest::default().validate().unwrap();
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r#"
app: ledger
workload:
  function_name: ledger_demo
  image: v1.2.3
"#;
        let manifest = DeploymentManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.app, "ledger");
        assert_eq!(manifest.stages, vec!["dev".to_string()]);
        assert!(manifest.databases.is_empty());
        assert!(!manifest.workload.canary);
    }

    #[test]
    fn test_unbound_database_reference_is_rejected() {
        let yaml = r#"
app: ledger
workload:
  function_name: ledger_demo
  database: billing
databases:
  - name: demo
"#;
        let err = DeploymentManifest::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("billing"));
    }

    #[test]
    fn test_duplicate_database_is_rejected() {
        let mut manifest = DeploymentManifest::default();
        manifest.databases.push(DatabaseSpec::new("demo"));
        assert!(matches!(
            manifest.validate(),
            Err(ConfigError::InvalidManifest(_))
        ));
    }
}
