//! Chat-completion client for OpenAI-compatible services.
//!
//! [`ChatClient::generate`] returns one [`Completion`];
//! [`ChatClient::stream`] returns a [`CompletionStream`] of text
//! [`Fragment`]s decoded from server-sent events.

use std::future::Future;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::http::{HttpClient, HttpError, Method};

mod sse;

use sse::EventBuffer;

/// Errors produced by the completion client.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("completion request failed: {0}")]
    Http(#[from] HttpError),

    #[error("completion response contained no choices")]
    NoChoices,

    #[error("malformed stream event: {0}")]
    Event(#[source] serde_json::Error),
}

/// Token accounting reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A finished completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// The model that actually served the request.
    pub model: String,
    pub usage: Usage,
}

/// A piece of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub model: String,
}

/// Optional sampling parameters, sent alongside the prompt.
///
/// `extra` carries any other request field the service understands and is
/// flattened into the request body as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A text-generation backend the relay can prompt.
pub trait LanguageModel {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> impl Future<Output = Result<Completion, ModelError>> + Send;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(flatten)]
    options: &'a GenerateOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for `POST {base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    model: String,
}

impl ChatClient {
    const COMPLETIONS_PATH: &'static str = "/chat/completions";

    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(config: &ModelConfig) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(config.endpoint.clone(), config.api_key.clone())?,
            model: config.model.clone(),
        })
    }

    /// The model requested by subsequent calls.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    fn chat_request(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        stream: bool,
    ) -> RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream,
            options,
        };
        let request = self
            .http
            .request(Method::POST, Self::COMPLETIONS_PATH)
            .json(&body);
        if stream {
            request.header(ACCEPT, "text/event-stream")
        } else {
            request
        }
    }

    /// Sends `prompt` as a single user message and waits for the whole reply.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Http`] for transport failures, non-2xx statuses
    /// (auth, rate limiting, ...) and undecodable bodies, and
    /// [`ModelError::NoChoices`] when the reply is empty.
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Completion, ModelError> {
        let request = self.chat_request(prompt, options, false);
        let response: ChatResponse = self.http.json(request).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ModelError::NoChoices)?;

        debug!(
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "completion received"
        );

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            model: response.model,
            usage: response.usage,
        })
    }

    /// Sends `prompt` with `"stream": true` and returns the fragment stream.
    ///
    /// # Errors
    ///
    /// Fails like [`generate`](Self::generate) if the request cannot be sent
    /// or the service answers with a non-2xx status.
    pub async fn stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<CompletionStream, ModelError> {
        let request = self.chat_request(prompt, options, true);
        let body = self.http.send(request).await?;
        Ok(CompletionStream {
            body,
            events: EventBuffer::new(),
            body_done: false,
            finished: false,
        })
    }
}

impl LanguageModel for ChatClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Completion, ModelError> {
        ChatClient::generate(self, prompt, options).await
    }
}

/// Lazily decoded fragments of one streamed completion.
///
/// Fragments come out in arrival order. The stream ends at the `[DONE]`
/// sentinel or when the connection ends, and cannot be restarted.
#[derive(Debug)]
pub struct CompletionStream {
    body: Response,
    events: EventBuffer,
    body_done: bool,
    finished: bool,
}

impl CompletionStream {
    /// Waits for the next non-empty fragment.
    ///
    /// Returns `None` once the stream has ended. A transport failure or a
    /// malformed event is yielded once, after which the stream is finished.
    pub async fn next(&mut self) -> Option<Result<Fragment, ModelError>> {
        while !self.finished {
            if let Some(data) = self.events.next_data() {
                if data.trim() == "[DONE]" {
                    self.finished = true;
                    break;
                }
                let chunk: StreamChunk = match serde_json::from_str(&data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed completion stream");
                        self.finished = true;
                        return Some(Err(ModelError::Event(e)));
                    }
                };
                let text = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|t| !t.is_empty());
                if let Some(text) = text {
                    return Some(Ok(Fragment {
                        text,
                        model: chunk.model,
                    }));
                }
                continue;
            }

            if self.body_done {
                self.finished = true;
                break;
            }

            match self.body.chunk().await {
                Ok(Some(bytes)) => self.events.extend(&bytes),
                Ok(None) => {
                    self.events.finish();
                    self.body_done = true;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(HttpError::from(e).into()));
                }
            }
        }
        None
    }

    /// Drains the stream, concatenating every fragment.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields.
    pub async fn collect_text(mut self) -> Result<String, ModelError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?.text);
        }
        Ok(text)
    }
}
