//! # neurorelay
//!
//! Polls a brain-computer-interface device API for readings, asks an
//! OpenAI-compatible chat-completion service whether to stimulate, and relays
//! the resulting stimulation pattern back to the device.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use neurorelay::config::Config;
//! use neurorelay::device::DeviceClient;
//! use neurorelay::llm::ChatClient;
//! use neurorelay::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let model = ChatClient::new(&config.model)?;
//!     let device = DeviceClient::new(&config.device)?;
//!     let mut relay = Orchestrator::new(model, device).with_settings(config.relay.clone());
//!     relay.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── Relay ─────────────────────────────────────────────────────────────────────
pub mod config;
pub mod device;
pub mod llm;
pub mod orchestrator;

// ── Transport ─────────────────────────────────────────────────────────────────
pub mod http;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{Config, ConfigError};
pub use device::{DeviceApi, DeviceClient, DeviceError, Sample, SampleBatch};
pub use llm::{ChatClient, Completion, LanguageModel, ModelError};
pub use orchestrator::{Decision, Orchestrator, RelayError, Tick};
