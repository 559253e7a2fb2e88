//! The relay loop: device readings → prompt → model → decision → device.
//!
//! ```text
//! Disconnected ──connect ok──▶ Running ──tick──▶ Running
//!      ▲                          │
//!      └──── stop (error or external request) ───┘
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, trace};

use crate::config::RelayConfig;
use crate::device::{DeviceApi, DeviceError, SampleBatch, StimulationPattern};
use crate::llm::{GenerateOptions, LanguageModel, ModelError};

/// Instruction placed in front of every serialized sample batch.
pub const PROMPT_INSTRUCTION: &str =
    "Process the following neural data and determine if stimulation is needed: ";

/// Errors that end a relay run.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to connect to device (status: {status})")]
    ConnectRejected { status: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// What the model decided for one batch.
///
/// Absent fields take their defaults, so `{}` is a valid "do nothing".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub should_stimulate: bool,
    #[serde(default)]
    pub pattern: StimulationPattern,
    #[serde(default)]
    pub confidence: f64,
}

impl Decision {
    /// Parses a model reply.
    ///
    /// # Errors
    ///
    /// Fails unless `text` is a JSON object whose known fields have the
    /// right types.
    pub fn from_reply(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text.trim())
    }

    /// Parses a model reply, treating anything unparseable as "do nothing".
    pub fn from_reply_or_hold(text: &str) -> Self {
        Self::from_reply(text).unwrap_or_else(|e| {
            debug!(error = %e, "model reply is not a decision; holding");
            Self::default()
        })
    }
}

#[derive(Serialize)]
struct PromptPayload<'a> {
    timestamp: &'a Value,
    readings: Vec<f64>,
    metadata: &'a Map<String, Value>,
}

/// Builds the model prompt for `batch`, or `None` if the batch is empty.
///
/// The JSON carries every reading value in order plus the first reading's
/// timestamp and metadata.
///
/// # Examples
///
/// ```
/// use neurorelay::device::{Sample, SampleBatch};
/// use neurorelay::orchestrator::{format_prompt, PROMPT_INSTRUCTION};
///
/// let batch = SampleBatch(vec![Sample::new(0.25), Sample::new(0.5)]);
/// let prompt = format_prompt(&batch).unwrap();
/// assert_eq!(
///     prompt,
///     format!(r#"{PROMPT_INSTRUCTION}{{"timestamp":null,"readings":[0.25,0.5],"metadata":{{}}}}"#)
/// );
/// assert!(format_prompt(&SampleBatch::default()).is_none());
/// ```
pub fn format_prompt(batch: &SampleBatch) -> Option<String> {
    let first = batch.first()?;
    let payload = PromptPayload {
        timestamp: &first.timestamp,
        readings: batch.values().collect(),
        metadata: &first.metadata,
    };
    // Plain JSON values with string keys always serialize.
    let json = serde_json::to_string(&payload).unwrap_or_default();
    Some(format!("{PROMPT_INSTRUCTION}{json}"))
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// The device returned no readings; the model was not consulted.
    Idle,
    /// The model declined to stimulate.
    Held(Decision),
    /// The pattern was sent to the device.
    Stimulated(Decision),
}

/// Owns both clients and runs the relay loop.
pub struct Orchestrator<M, D> {
    model: M,
    device: D,
    options: GenerateOptions,
    settings: RelayConfig,
    connected: bool,
    processing: bool,
}

impl<M, D> Orchestrator<M, D>
where
    M: LanguageModel,
    D: DeviceApi,
{
    pub fn new(model: M, device: D) -> Self {
        Self {
            model,
            device,
            options: GenerateOptions::default(),
            settings: RelayConfig::default(),
            connected: false,
            processing: false,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RelayConfig) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    /// Sampling options passed with every prompt.
    #[must_use]
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// `true` while a batch is with the model. Diagnostic only.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Connects, then relays until a call fails.
    ///
    /// A rejected connect returns [`RelayError::ConnectRejected`] without
    /// reading anything. Once the loop has started, the first error stops it,
    /// [`stop`](Self::stop) runs, and the error is returned.
    ///
    /// # Errors
    ///
    /// See above; there is no retry.
    pub async fn run(&mut self) -> Result<(), RelayError> {
        let outcome = self.connect_and_relay().await;
        self.finish(outcome).await
    }

    /// Like [`run`](Self::run), but stops early when `shutdown` resolves.
    ///
    /// An in-flight iteration is abandoned at its current await point. The
    /// disconnect that follows always runs to completion.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run) when the loop ends on its own.
    pub async fn run_until<S>(&mut self, shutdown: S) -> Result<(), RelayError>
    where
        S: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            outcome = self.connect_and_relay() => outcome,
            () = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
        };
        self.finish(outcome).await
    }

    async fn connect_and_relay(&mut self) -> Result<(), RelayError> {
        let status = self.device.connect().await?;
        if !status.is_connected() {
            return Err(RelayError::ConnectRejected {
                status: status.status.unwrap_or_else(|| "none".to_owned()),
            });
        }
        self.connected = true;
        info!("connected to device");
        self.relay().await
    }

    async fn finish(&mut self, outcome: Result<(), RelayError>) -> Result<(), RelayError> {
        if let Err(e) = &outcome {
            error!(error = %e, "relay loop aborted");
        }
        self.stop().await;
        outcome
    }

    async fn relay(&mut self) -> Result<(), RelayError> {
        while self.connected {
            match self.tick().await {
                Ok(Tick::Idle) => trace!("no readings"),
                Ok(Tick::Held(decision)) => {
                    debug!(confidence = decision.confidence, "holding");
                }
                Ok(Tick::Stimulated(decision)) => {
                    info!(confidence = decision.confidence, "stimulation sent");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
        Ok(())
    }

    /// Runs one iteration: read, prompt, decide, maybe stimulate.
    ///
    /// # Errors
    ///
    /// Any device or model call failure. An unparseable model reply is not
    /// an error; it yields [`Tick::Held`] with the default decision.
    pub async fn tick(&mut self) -> Result<Tick, RelayError> {
        let batch = self
            .device
            .read_samples(self.settings.read_duration_ms)
            .await?;
        let Some(prompt) = format_prompt(&batch) else {
            return Ok(Tick::Idle);
        };

        self.processing = true;
        let completion = self.model.generate(&prompt, &self.options).await?;
        let decision = Decision::from_reply_or_hold(&completion.text);
        self.processing = false;

        if !decision.should_stimulate {
            return Ok(Tick::Held(decision));
        }
        let ack = self.device.send_command(&decision.pattern).await?;
        debug!(%ack, "device acknowledged stimulation");
        Ok(Tick::Stimulated(decision))
    }

    /// Disconnects if connected. Attempted once; failure is logged, not returned.
    pub async fn stop(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.processing = false;
        match self.device.disconnect().await {
            Ok(_) => info!("disconnected from device"),
            Err(e) => error!(error = %e, "error disconnecting from device"),
        }
    }
}
