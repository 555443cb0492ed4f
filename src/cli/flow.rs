use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::CliContext;
use pocketflow::{flow::Flow, flow_file::load_flow, logger::init_tracing};

#[derive(Args, Debug)]
pub struct FlowFileArgs {
    /// Flow file (.json, .yaml or .yml)
    pub file: PathBuf,
}

fn load(args: &FlowFileArgs, context: &CliContext) -> anyhow::Result<Flow> {
    init_tracing(&context.log_level, None)?;
    load_flow(&args.file, &context.registry)
        .with_context(|| format!("Invalid flow file: {}", args.file.display()))
}

pub fn validate(args: FlowFileArgs, context: &CliContext) -> anyhow::Result<()> {
    let flow = load(&args, context)?;
    println!("✅ Flow `{}` is valid ({} nodes).", flow.name(), flow.len());
    Ok(())
}

pub fn visualize(args: FlowFileArgs, context: &CliContext) -> anyhow::Result<()> {
    let flow = load(&args, context)?;
    println!("{}", flow.visualize());
    Ok(())
}
