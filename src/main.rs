use anyhow::Result;
use tracing::{error, info};

use menuscope::app::api::app_api_loop;
use menuscope::environment::AppConfig;
use menuscope::logging::configure_logging;

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    info!(
        "Starting menuscope {} ({}), built {} with {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        option_env!("RUST_VERSION").unwrap_or("unknown rustc"),
    );

    let config = AppConfig::from_env().inspect_err(|e| error!("Startup failed: {:#}", e))?;

    tokio::select! {
        result = app_api_loop(&config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down.");
            Ok(())
        }
    }
}
