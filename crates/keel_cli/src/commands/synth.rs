//! Synth command - Write templates and the assembly manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use keel_core::AssemblyWriter;

use super::{compose, GlobalArgs, StageArgs};

#[derive(Args)]
pub struct SynthArgs {
    #[command(flatten)]
    stage: StageArgs,

    /// Output directory; each stage gets its own subdirectory
    #[arg(short, long, default_value = "keel.out")]
    out: PathBuf,
}

pub async fn execute(global: &GlobalArgs, args: SynthArgs) -> Result<()> {
    let app = compose(global, &args.stage)?;

    for stage in app.stages() {
        let assembly = stage.synthesize();
        let dir = args.out.join(stage.name().as_str());
        let written = AssemblyWriter::write(&assembly, &dir)
            .await
            .with_context(|| format!("Failed to write assembly for {}", stage.name()))?;

        info!("Stage {} synthesized into {:?}", stage.name(), dir);
        println!(
            "{} ({} stacks, run {})",
            stage.name(),
            assembly.manifest.stacks.len(),
            assembly.manifest.run_id
        );
        for path in written {
            println!("  {}", path.display());
        }
    }

    Ok(())
}
