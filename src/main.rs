//! Binary entry point that wires environment bootstrap and logging, then
//! launches the interactive light assistant loop.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use ledi::assistant;

#[tokio::main]
/// Bootstraps environment variables and diagnostics, then launches the
/// asynchronous conversation loop.
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    assistant::run_assistant().await
}
