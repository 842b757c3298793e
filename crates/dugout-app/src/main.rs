// Dugout entry point.
//
// Startup sequence:
// 1. Load config (copying defaults on first run)
// 2. Initialize tracing (log to file)
// 3. Open the data directory and load every collection
// 4. Report advisor status
// 5. Serve the HTTP API until shutdown

use anyhow::{anyhow, Context};
use dugout_app::api;
use dugout_app::state::AppState;
use dugout_core::config::{self, LoggingConfig};
use dugout_llm::AdvisoryClient;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(&config.logging)?;
    info!("Dugout starting up");
    info!(
        "Config loaded: provider={}, model={}, listening on {}:{}",
        config.ai.provider, config.ai.preferred_model, config.server.address, config.server.port
    );

    // 3. Load saved data
    let server = config.server.clone();
    let state = AppState::open(config)?;

    // 4. Advisor status. The API runs either way.
    match &state.advisor {
        AdvisoryClient::Active(provider) => {
            if state.advisor.check_connection().await {
                info!("Advisor ready ({}, model {})", provider.name(), provider.model());
            } else {
                warn!(
                    "{} is not reachable; advisory endpoints will fail until it is",
                    provider.name()
                );
            }
        }
        AdvisoryClient::Disabled(reason) => info!("Advisor disabled: {}", reason),
    }

    // 5. Serve
    let rocket = api::build_rocket(state.into_shared(), &server)?;
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("server failed: {e}"))?;

    info!("Dugout shut down cleanly");
    Ok(())
}

/// Initialize tracing to write to `<log_dir>/dugout.log`. `RUST_LOG`
/// overrides the configured filter.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join(&logging.log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("dugout.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
