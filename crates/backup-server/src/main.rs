use anyhow::{Context, Result};
use backup_server::{init_logging, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load().context("Failed to load configuration")?;

    init_logging(&config).context("Failed to initialize logging")?;

    backup_server::run(config).await.context("Server error")?;

    Ok(())
}
