mod cast;
mod cli;
mod config;
mod launcher;
mod status;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
