mod address;
mod config;
mod context_registry;
mod downloads;
mod navigation_gate;
mod policy_store;
mod rating_oracle;
mod reachability;
mod shell;
mod stats;
mod sync;

#[cfg(test)]
mod test_support;

use std::error::Error;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ShellConfig;
use crate::shell::ShellController;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = ShellConfig::fragfinn_defaults();
    tracing::info!(home_url = %config.home_url, "starting browser shell");

    let (shell, mut events) = ShellController::new(config)?;

    if shell.is_first_run() {
        tracing::info!("parental controls are not configured yet; the setup wizard runs first");
    }

    while let Ok(event) = events.try_recv() {
        tracing::debug!(?event, "startup event");
    }
    tracing::info!(tabs = shell.tab_count(), "browser shell initialized");

    Ok(())
}
