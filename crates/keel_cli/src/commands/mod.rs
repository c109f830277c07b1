//! CLI command definitions.
//!
//! This module defines the command structure for the Keel CLI and the helpers
//! every command shares: manifest loading, stage selection and composition.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use keel_config::{AmbientContext, DeploymentManifest, EnvironmentTable, MANIFEST_FILE};
use keel_core::{compose_app, App};

pub mod config;
pub mod deploy;
pub mod graph;
pub mod init;
pub mod outputs;
pub mod synth;

/// Keel - stage-aware infrastructure orchestration
#[derive(Parser)]
#[command(name = "keel")]
#[command(version, about = "Keel - stage-aware infrastructure orchestration")]
#[command(long_about = r#"
Keel composes the network, database, compute and image repository stacks of
an application for one or more environments, orders them by dependency, and
synthesizes provisioning templates.

COMMANDS:
  init     → Write a starter keel.yaml
  config   → Show the resolved environment configuration
  synth    → Write templates and the assembly manifest
  graph    → Show stacks, dependencies and build order
  outputs  → List published export names
  deploy   → Provision stacks in build order (dry run)

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration error
  4 - Dependency graph error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Path to the deployment manifest
    #[arg(short, long, global = true, env = "KEEL_MANIFEST", default_value = MANIFEST_FILE)]
    pub manifest: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn global(&self) -> GlobalArgs {
        GlobalArgs {
            manifest: self.manifest.clone(),
        }
    }
}

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub manifest: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter deployment manifest
    Init(init::InitArgs),

    /// Show the resolved configuration of a stage
    Config(config::ConfigArgs),

    /// Synthesize templates for the selected stages
    Synth(synth::SynthArgs),

    /// Show the stack dependency graph
    Graph(graph::GraphArgs),

    /// List exported outputs
    Outputs(outputs::OutputsArgs),

    /// Provision the selected stages
    Deploy(deploy::DeployArgs),
}

/// Stage and workload selection.
#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    /// Stage to compose (defaults to the manifest's stages)
    #[arg(short, long, env = "KEEL_STAGE")]
    pub stage: Option<String>,

    /// Workload image tag or sha256 digest
    #[arg(short, long, env = "KEEL_IMAGE")]
    pub image: Option<String>,
}

impl StageArgs {
    /// Stage names to compose, in order.
    pub fn stages(&self, manifest: &DeploymentManifest) -> Vec<String> {
        match &self.stage {
            Some(stage) => vec![stage.clone()],
            None => manifest.stages.clone(),
        }
    }
}

pub fn load_manifest(path: &Path) -> Result<DeploymentManifest> {
    if !path.exists() {
        anyhow::bail!(
            "Manifest not found: {:?}. Run `keel init` or pass --manifest.",
            path
        );
    }
    DeploymentManifest::from_file(path)
        .with_context(|| format!("Failed to load manifest {:?}", path))
}

/// Load the manifest, apply the image override, and compose the selected stages.
pub fn compose(global: &GlobalArgs, args: &StageArgs) -> Result<App> {
    let mut manifest = load_manifest(&global.manifest)?;
    if let Some(image) = &args.image {
        manifest = manifest.with_image(image.clone());
    }

    let table = EnvironmentTable::standard();
    table.validate().context("Environment table is invalid")?;

    let ambient = AmbientContext::from_env();
    let stages = args.stages(&manifest);
    debug!("Composing stages {:?} from {:?}", stages, global.manifest);

    let app = compose_app(&table, &manifest, &stages, &ambient)
        .with_context(|| format!("Failed to compose {}", manifest.app))?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stage_flag_overrides_manifest_stages() {
        let mut manifest = DeploymentManifest::default();
        manifest.stages = vec!["dev".to_string(), "prod".to_string()];

        let all = StageArgs {
            stage: None,
            image: None,
        };
        assert_eq!(all.stages(&manifest), vec!["dev", "prod"]);

        let one = StageArgs {
            stage: Some("prod".to_string()),
            image: None,
        };
        assert_eq!(one.stages(&manifest), vec!["prod"]);
    }

    #[test]
    fn test_parse_synth_arguments() {
        let cli = Cli::try_parse_from([
            "keel", "--manifest", "infra/keel.yaml", "synth", "--stage", "prod", "--image", "v1.0.0",
        ])
        .unwrap();
        assert_eq!(cli.global().manifest, PathBuf::from("infra/keel.yaml"));
        assert!(matches!(cli.command, Commands::Synth(_)));
    }

    #[test]
    fn test_compose_applies_image_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        DeploymentManifest::default().to_file(&path).unwrap();

        let global = GlobalArgs { manifest: path };
        let missing = StageArgs {
            stage: Some("dev".to_string()),
            image: None,
        };
        assert!(compose(&global, &missing).is_err());

        let args = StageArgs {
            image: Some("v1.0.0".to_string()),
            ..missing
        };
        let app = compose(&global, &args).unwrap();
        assert_eq!(app.stages().len(), 1);
    }

    #[test]
    fn test_missing_manifest_is_reported() {
        let dir = tempdir().unwrap();
        let err = load_manifest(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
