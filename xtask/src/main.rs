mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::prepare::PrepareArgs;

#[derive(Parser)]
#[command(name = "xtask", about = "Project task runner")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the reference and transaction databases used by the test suites
    Prepare(PrepareArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();
    match args.command {
        Command::Prepare(cmd) => cmd.run().await,
    }
}
