//! Config command - Show the resolved environment configuration.

use anyhow::{Context, Result};
use clap::Args;

use keel_config::{AmbientContext, EnvironmentTable};

use super::GlobalArgs;

#[derive(Args)]
pub struct ConfigArgs {
    /// Stage to resolve; unknown names fall back to dev
    #[arg(short, long, env = "KEEL_STAGE", default_value = "dev")]
    stage: String,

    /// Print JSON instead of YAML
    #[arg(long)]
    json: bool,
}

pub async fn execute(_global: &GlobalArgs, args: ConfigArgs) -> Result<()> {
    let table = EnvironmentTable::standard();
    table.validate().context("Environment table is invalid")?;

    let config = table.resolve_with(&args.stage, &AmbientContext::from_env());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }

    Ok(())
}
