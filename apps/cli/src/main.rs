//! sitecorpus CLI: crawl a website, filter it into a local corpus, ingest
//! the corpus into a remote retrieval index, and ask questions against it.

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
