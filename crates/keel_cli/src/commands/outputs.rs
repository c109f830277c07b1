//! Outputs command - List published export names.

use anyhow::Result;
use clap::Args;

use super::{compose, GlobalArgs, StageArgs};

#[derive(Args)]
pub struct OutputsArgs {
    #[command(flatten)]
    stage: StageArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub async fn execute(global: &GlobalArgs, args: OutputsArgs) -> Result<()> {
    let app = compose(global, &args.stage)?;

    if args.json {
        let records: Vec<_> = app
            .stages()
            .iter()
            .flat_map(|stage| stage.outputs().records())
            .collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for stage in app.stages() {
        println!("{}:", stage.name());
        for record in stage.outputs().records() {
            println!(
                "  {:<32} {:<10} {}",
                record.export_name, record.stack.name, record.description
            );
        }
    }

    Ok(())
}
