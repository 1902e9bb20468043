use std::time::Duration;

use http::StatusCode;
use modkit_edm::{FormatError, MetadataResolutionError};
use thiserror::Error;

/// Transport-level failures. No HTTP status was received.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid URL (failed to parse or not absolute)
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri { url: String, reason: String },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// Request timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        TransportError::Connection(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        TransportError::Connection(Box::new(err))
    }
}

/// Classification of an [`ODataError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ODataErrorKind {
    /// A value could not be encoded as its EDM type.
    Format,
    /// A type, key or operation could not be resolved against metadata.
    MetadataResolution,
    /// The request never produced an HTTP status.
    Transport,
    /// The server answered with a failure, or with something unreadable.
    Protocol,
    /// Invalid client configuration.
    Configuration,
}

/// Normalized OData failure.
///
/// `message` carries the accumulated server messages when the body had any,
/// otherwise the status text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ODataError {
    pub kind: ODataErrorKind,
    pub message: String,
    pub status: Option<StatusCode>,
    pub status_text: String,
    pub url: Option<String>,
    /// Raw response body, when there was one.
    pub body: Option<String>,
}

impl ODataError {
    #[must_use]
    pub fn new(kind: ODataErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            status_text: String::new(),
            url: None,
            body: None,
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ODataErrorKind::Protocol, message)
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ODataErrorKind::Configuration, message)
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl From<FormatError> for ODataError {
    fn from(err: FormatError) -> Self {
        Self::new(ODataErrorKind::Format, err.to_string())
    }
}

impl From<MetadataResolutionError> for ODataError {
    fn from(err: MetadataResolutionError) -> Self {
        match err {
            MetadataResolutionError::Format(inner) => inner.into(),
            other => Self::new(ODataErrorKind::MetadataResolution, other.to_string()),
        }
    }
}

impl From<TransportError> for ODataError {
    fn from(err: TransportError) -> Self {
        let rendered = err.to_string();
        Self {
            kind: ODataErrorKind::Transport,
            status_text: rendered.clone(),
            message: rendered,
            status: None,
            url: None,
            body: None,
        }
    }
}
