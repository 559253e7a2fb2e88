//! `neurorelay` — runs the device ⇄ model relay until Ctrl-C.
//!
//! Configuration comes from the environment and an optional `.env` file
//! (see [`neurorelay::config`]); log verbosity from `RUST_LOG` (default
//! `info`).

use neurorelay::config::Config;
use neurorelay::device::DeviceClient;
use neurorelay::llm::ChatClient;
use neurorelay::orchestrator::Orchestrator;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::load().inspect_err(|e| error!(error = %e, "invalid configuration"))?;
    info!(
        model = %config.model.model,
        model_api = %config.model.endpoint,
        device_api = %config.device.endpoint,
        "starting relay between language model and device"
    );

    let model = ChatClient::new(&config.model)?;
    let device = DeviceClient::new(&config.device)?;
    let mut relay = Orchestrator::new(model, device).with_settings(config.relay);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable; running until the relay stops");
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = relay.run_until(shutdown).await {
        error!(error = %e, "relay stopped");
    }
    Ok(())
}
