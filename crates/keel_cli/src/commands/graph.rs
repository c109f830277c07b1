//! Graph command - Show stacks, dependencies and build order.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use keel_core::Stage;

use super::{compose, GlobalArgs, StageArgs};

#[derive(Args)]
pub struct GraphArgs {
    #[command(flatten)]
    stage: StageArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn to_json(stage: &Stage) -> serde_json::Value {
    let stacks: Vec<_> = stage
        .build_order()
        .into_iter()
        .map(|stack| {
            json!({
                "stack": stack.stack_name,
                "resources": stack.resources.len(),
                "depends_on": stack.dependencies.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "stage": stage.name(), "build_order": stacks })
}

pub async fn execute(global: &GlobalArgs, args: GraphArgs) -> Result<()> {
    let app = compose(global, &args.stage)?;

    if args.json {
        let stages: Vec<_> = app.stages().iter().map(to_json).collect();
        println!("{}", serde_json::to_string_pretty(&stages)?);
        return Ok(());
    }

    for stage in app.stages() {
        println!("{}:", stage.name());
        for (position, stack) in stage.build_order().into_iter().enumerate() {
            let deps: Vec<&str> = stack.dependencies.iter().map(|d| d.name.as_str()).collect();
            if deps.is_empty() {
                println!("  {}. {}", position + 1, stack.stack_name);
            } else {
                println!("  {}. {} <- {}", position + 1, stack.stack_name, deps.join(", "));
            }
        }
    }

    Ok(())
}
