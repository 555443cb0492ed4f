use clap::{Parser, Subcommand};

pub mod daemon;
pub mod flow;
pub mod run;
pub mod schema;

use daemon::DaemonArgs;
use flow::FlowFileArgs;
use run::RunArgs;
use schema::SchemaArgs;

use pocketflow::registry::NodeRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "pocketflow",
    about = "Run node pipelines chained by action transitions",
    version
)]
pub struct Cli {
    /// Log level for every command except `daemon`, which reads LOG_LEVEL
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a flow file once and print the resulting store as JSON
    Run(RunArgs),

    /// Check that a flow file parses and builds
    Validate(FlowFileArgs),

    /// Print the transition graph of a flow file
    Visualize(FlowFileArgs),

    /// Emit the JSON schema of flow files
    Schema(SchemaArgs),

    /// Serve the flows of a directory until Ctrl-C
    Daemon(DaemonArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub log_level: String,
    pub registry: NodeRegistry,
}

impl CliContext {
    pub fn new(log_level: String, registry: NodeRegistry) -> Self {
        Self { log_level, registry }
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Validate(args) => flow::validate(args, context),
        Commands::Visualize(args) => flow::visualize(args, context),
        Commands::Schema(args) => schema::execute(args, context),
        Commands::Daemon(args) => daemon::execute(args, context).await,
    }
}
