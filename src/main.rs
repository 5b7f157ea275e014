//! honeybot - real-time web traffic intelligence.

use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let args = cli::Cli::parse();
    cli::run(args).await
}
