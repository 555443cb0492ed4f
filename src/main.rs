use clap::Parser;

mod cli;

use cli::{Cli, CliContext};
use pocketflow::registry::NodeRegistry;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let context = CliContext::new(cli.log_level, NodeRegistry::with_builtins());
    cli::execute(&context, cli.command).await
}
