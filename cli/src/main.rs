use clap::Parser;
use commands::{list, run};
use eyre::Result;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cliconform")]
#[command(about = "cliconform: conformance checks for a node's command-line RPC client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the conformance suite against a running node
    Run(run::RunArgs),
    /// List scenarios and their preconditions
    List(list::ListArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Reports go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cliconform=info".parse()?)
                .add_directive("cliconform_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::List(args) => list::run(args),
    }
}
