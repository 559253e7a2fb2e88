//! Device API client — readings in, stimulation commands out.
//!
//! Every operation is an independent HTTP call on a fresh connection. The
//! client holds no session: "connected" is the device's notion, reported in
//! the [`DeviceStatus`] it returns.

use std::future::Future;

use reqwest::RequestBuilder;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::http::{HttpClient, HttpError, Method};

/// Opaque stimulation command payload. Its shape belongs to the device API.
pub type StimulationPattern = Map<String, Value>;

/// A device operation failed. The message names the operation.
#[derive(Debug, Error)]
#[error("device {op} failed: {source}")]
pub struct DeviceError {
    pub op: &'static str,
    #[source]
    pub source: HttpError,
}

impl DeviceError {
    pub fn new(op: &'static str, source: HttpError) -> Self {
        Self { op, source }
    }
}

/// One device reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    #[serde(default)]
    pub timestamp: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: Value::Null,
            metadata: Map::new(),
        }
    }
}

/// The readings returned by one poll, in device order.
///
/// On the wire this is a bare JSON array of [`Sample`] objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleBatch(pub Vec<Sample>);

impl SampleBatch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The reading whose timestamp and metadata stand for the whole batch.
    pub fn first(&self) -> Option<&Sample> {
        self.0.first()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|s| s.value)
    }
}

impl From<Vec<Sample>> for SampleBatch {
    fn from(samples: Vec<Sample>) -> Self {
        Self(samples)
    }
}

/// Status object returned by connect, status, and disconnect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default)]
    pub status: Option<String>,
    /// Every other field, untouched.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl DeviceStatus {
    pub const CONNECTED: &'static str = "connected";

    /// Returns `true` when the device reports `"status": "connected"`.
    pub fn is_connected(&self) -> bool {
        self.status.as_deref() == Some(Self::CONNECTED)
    }
}

/// The device operations the relay depends on.
pub trait DeviceApi {
    /// Opens the device session.
    fn connect(&self) -> impl Future<Output = Result<DeviceStatus, DeviceError>> + Send;

    /// Reads samples; `duration_ms` is a hint to the device, not a deadline.
    fn read_samples(
        &self,
        duration_ms: u64,
    ) -> impl Future<Output = Result<SampleBatch, DeviceError>> + Send;

    /// Sends a stimulation command and returns the device's acknowledgement.
    fn send_command(
        &self,
        pattern: &StimulationPattern,
    ) -> impl Future<Output = Result<Value, DeviceError>> + Send;

    fn get_status(&self) -> impl Future<Output = Result<DeviceStatus, DeviceError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<DeviceStatus, DeviceError>> + Send;
}

/// HTTP client for the device API.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: HttpClient,
}

impl DeviceClient {
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(config: &DeviceConfig) -> Result<Self, HttpError> {
        let http = HttpClient::new(config.endpoint.clone(), config.api_key.clone())?;
        Ok(Self { http })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, path)
            .header(CONTENT_TYPE, "application/json")
    }

    async fn call<T>(&self, op: &'static str, request: RequestBuilder) -> Result<T, DeviceError>
    where
        T: serde::de::DeserializeOwned,
    {
        debug!(op, "device call");
        self.http
            .json(request)
            .await
            .map_err(|source| DeviceError::new(op, source))
    }
}

impl DeviceApi for DeviceClient {
    async fn connect(&self) -> Result<DeviceStatus, DeviceError> {
        self.call("connect", self.request(Method::POST, "/connect"))
            .await
    }

    async fn read_samples(&self, duration_ms: u64) -> Result<SampleBatch, DeviceError> {
        let request = self
            .request(Method::GET, "/read")
            .query(&[("duration", duration_ms)]);
        self.call("read", request).await
    }

    async fn send_command(&self, pattern: &StimulationPattern) -> Result<Value, DeviceError> {
        let request = self.request(Method::POST, "/stimulate").json(pattern);
        self.call("stimulate", request).await
    }

    async fn get_status(&self) -> Result<DeviceStatus, DeviceError> {
        self.call("status", self.request(Method::GET, "/status"))
            .await
    }

    async fn disconnect(&self) -> Result<DeviceStatus, DeviceError> {
        self.call("disconnect", self.request(Method::POST, "/disconnect"))
            .await
    }
}
