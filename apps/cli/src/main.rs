//! Triangulate CLI: multi-source research from the terminal.
//!
//! Queries an AI search service, a web search service and any URLs you
//! supply, then synthesizes one cited, balance-audited Markdown answer.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
