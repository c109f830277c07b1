//! Init command - Write a starter manifest.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use keel_config::DeploymentManifest;

use super::GlobalArgs;

#[derive(Args)]
pub struct InitArgs {
    /// Application name
    #[arg(short, long, default_value = "keel")]
    app: String,

    /// Overwrite an existing manifest
    #[arg(short, long)]
    force: bool,
}

pub async fn execute(global: &GlobalArgs, args: InitArgs) -> Result<()> {
    let path = &global.manifest;
    if path.exists() && !args.force {
        anyhow::bail!(
            "Manifest already exists at {:?}. Use --force to overwrite.",
            path
        );
    }

    let mut manifest = DeploymentManifest::default();
    manifest.workload.function_name = format!("{}_demo", args.app.replace('-', "_"));
    manifest.app = args.app;
    manifest.validate().context("Invalid application name")?;

    info!("Writing manifest to {:?}", path);
    manifest
        .to_file(path)
        .with_context(|| format!("Failed to write {:?}", path))?;

    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  keel synth --stage dev --image <tag>");

    Ok(())
}
