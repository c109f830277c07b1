//! Deploy command - Provision stacks in build order.
//!
//! Only the dry-run engine ships with Keel; it walks the same order a real
//! engine would and logs every stack.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use keel_core::{provision, DryRunEngine};

use super::{compose, GlobalArgs, StageArgs};

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    stage: StageArgs,

    /// Write the provisioning report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

pub async fn execute(global: &GlobalArgs, args: DeployArgs) -> Result<()> {
    let app = compose(global, &args.stage)?;
    let engine = DryRunEngine;

    let mut reports = Vec::new();
    for stage in app.stages() {
        let assembly = stage.synthesize();
        let report = provision(&engine, &assembly)
            .await
            .with_context(|| format!("Deployment of stage {} failed", stage.name()))?;

        println!("{} (run {}):", stage.name(), report.run_id);
        for stack in &report.stacks {
            println!(
                "  {:<28} {:?} ({} resources)",
                stack.stack_name, stack.status, stack.resource_count
            );
        }
        reports.push(report);
    }

    if let Some(path) = &args.report {
        info!("Writing provisioning report to {:?}", path);
        tokio::fs::write(path, serde_json::to_vec_pretty(&reports)?)
            .await
            .with_context(|| format!("Failed to write report {:?}", path))?;
    }

    Ok(())
}
