//! Base URLs of remote services.

use std::fmt;

use reqwest::Url;
use thiserror::Error;

/// Errors produced while parsing a base URL into an [`Endpoint`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("malformed URL: {0}")]
    Malformed(String),

    #[error("unsupported scheme `{0}` (expected http or https)")]
    UnsupportedScheme(String),

    #[error("missing host")]
    MissingHost,
}

/// A validated `http(s)://host[:port][/prefix]` base URL.
///
/// Request paths are appended to the prefix, so an endpoint of
/// `https://api.openai.com/v1` resolves `/chat/completions` to
/// `https://api.openai.com/v1/chat/completions`.
///
/// # Examples
///
/// ```
/// use neurorelay::http::Endpoint;
///
/// let endpoint = Endpoint::parse("https://device.local:9000/api/").unwrap();
/// assert_eq!(endpoint.host(), "device.local");
/// assert_eq!(endpoint.port(), 9000);
/// assert_eq!(endpoint.url("/read").as_str(), "https://device.local:9000/api/read");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Parses a base URL. Query strings and fragments are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if the URL does not parse, the scheme is
    /// neither `http` nor `https`, or there is no host.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        let mut base = Url::parse(url.trim()).map_err(|e| EndpointError::Malformed(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(EndpointError::UnsupportedScheme(base.scheme().to_owned()));
        }
        if base.host_str().is_none_or(str::is_empty) {
            return Err(EndpointError::MissingHost);
        }

        base.set_query(None);
        base.set_fragment(None);
        let prefix = base.path().trim_end_matches('/').to_owned();
        base.set_path(&prefix);
        Ok(Self { base })
    }

    /// Returns the host name or address, without IPv6 brackets.
    pub fn host(&self) -> &str {
        let host = self.base.host_str().unwrap_or_default();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// Returns the port, falling back to the scheme's default.
    pub fn port(&self) -> u16 {
        self.base.port_or_known_default().unwrap_or(80)
    }

    pub fn is_tls(&self) -> bool {
        self.base.scheme() == "https"
    }

    /// Returns the absolute URL of `path` under this endpoint's prefix.
    pub fn url(&self, path: &str) -> Url {
        let prefix = self.base.path().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let mut url = self.base.clone();
        url.set_path(&format!("{prefix}/{path}"));
        url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}
