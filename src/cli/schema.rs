use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Args;

use super::CliContext;
use pocketflow::{flow_file::flow_schema, logger::init_tracing};

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write the schema here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    init_tracing(&context.log_level, None)?;
    let schema = serde_json::to_string_pretty(&flow_schema())?;

    match args.out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, schema)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{schema}"),
    }
    Ok(())
}
