//! Shared HTTP plumbing for the remote APIs.
//!
//! Connections are not pooled: every call dials the service afresh. There
//! is no per-call timeout.

use bytes::{Bytes, BytesMut};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::Endpoint;

/// Errors produced by the HTTP client.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("server answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Maximum size of a response body collected in memory (8 MiB).
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// An HTTP client bound to one [`Endpoint`] and one bearer token.
///
/// # Examples
///
/// ```rust,no_run
/// use neurorelay::http::{Endpoint, HttpClient, Method};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(Endpoint::parse("https://device.example/api")?, "secret")?;
/// let status: serde_json::Value = client.json(client.request(Method::GET, "/status")).await?;
/// println!("{status}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    endpoint: Endpoint,
    token: String,
}

impl HttpClient {
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(endpoint: Endpoint, token: impl Into<String>) -> Result<Self, HttpError> {
        let client = Client::builder().pool_max_idle_per_host(0).build()?;
        Ok(Self {
            client,
            endpoint,
            token: token.into(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Starts an authorised request for `path` under the endpoint prefix.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint.url(path))
            .bearer_auth(&self.token)
    }

    /// Sends `request` and returns the response once its head has arrived.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Transport`] if the request cannot be sent and
    /// [`HttpError::Status`], carrying the body text, for non-2xx answers.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, HttpError> {
        let request = request.build()?;
        debug!(method = %request.method(), url = %request.url(), "sending request");

        let response = self.client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = read_body(response).await?;
        Err(HttpError::Status {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// Sends `request` and decodes a 2xx JSON body into `T`.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`HttpError::TooLarge`] and
    /// [`HttpError::Json`] for bodies that cannot be decoded.
    pub async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HttpError> {
        let body = read_body(self.send(request).await?).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Collects a response body, refusing anything over [`MAX_BODY_SIZE`].
async fn read_body(mut response: Response) -> Result<Bytes, HttpError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_BODY_SIZE {
            return Err(HttpError::TooLarge {
                max_bytes: MAX_BODY_SIZE,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
