//! Headless notification listener entry point.
//!
//! Usage: `cowork-notify-listener blogHub:BlogApproved reportHub:ReportCreated,ReportClosed`
//!
//! The access token is read from `COWORK_ACCESS_TOKEN`.

mod listener;

use tracing_subscriber::EnvFilter;

use cowork_hub_connection::HubConfig;

/// Environment variable holding the bearer token.
const ACCESS_TOKEN_ENV: &str = "COWORK_ACCESS_TOKEN";

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cowork=debug")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting notify listener"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let subscriptions = listener::parse_subscriptions(&args)?;

    let token = std::env::var(ACCESS_TOKEN_ENV).unwrap_or_default();
    if token.trim().is_empty() {
        anyhow::bail!("{ACCESS_TOKEN_ENV} is not set");
    }

    // Load configuration.
    let config = HubConfig::load()?;
    tracing::info!(base_url = %config.base_url, hubs = config.hubs.len(), "configuration loaded");

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(listener::run(config, subscriptions, token))?;

    tracing::info!("listener shut down cleanly");
    Ok(())
}
