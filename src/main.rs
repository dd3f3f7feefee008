use anyhow::Result;
use tracing_subscriber::EnvFilter;

use lifelist::config::Config;
use lifelist::gateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lifelist=info,warn")),
        )
        .init();

    let config = Config::load()?;
    config.validate()?;

    gateway::run(config).await
}
