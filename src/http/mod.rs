//! HTTP transport shared by the device and model clients.
//!
//! [`Endpoint`] validates a service's base URL once at startup;
//! [`HttpClient`] resolves paths under it, adds the bearer token, and turns
//! non-2xx answers into [`HttpError::Status`].

mod client;
mod endpoint;

pub use client::{HttpClient, HttpError};
pub use endpoint::{Endpoint, EndpointError};
pub use reqwest::{Method, StatusCode};
