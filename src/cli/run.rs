use std::{path::PathBuf, process};

use anyhow::Context;
use clap::Args;
use serde_json::Value;

use super::CliContext;
use pocketflow::{
    flow::DEFAULT_MAX_STEPS,
    flow_file::load_flow,
    logger::init_tracing,
    state::Store,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Flow file (.json, .yaml or .yml)
    pub file: PathBuf,

    /// Initial store as a JSON object, e.g. '{"name": "ada"}'
    #[arg(long)]
    pub input: Option<String>,

    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    pub max_steps: usize,
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    init_tracing(&context.log_level, None)?;

    let flow = load_flow(&args.file, &context.registry)
        .with_context(|| format!("Failed to load flow: {}", args.file.display()))?;

    let input = match args.input {
        Some(raw) => {
            let value: Value = serde_json::from_str(&raw).context("--input is not valid JSON")?;
            Some(Store::from_json(value).context("--input must be a JSON object")?)
        }
        None => None,
    };

    let max_steps = args.max_steps;
    let store = tokio::task::spawn_blocking(move || flow.run(input, max_steps)).await?;

    println!("{}", serde_json::to_string_pretty(&store.to_json())?);
    if !store.completed() {
        process::exit(1);
    }
    Ok(())
}
