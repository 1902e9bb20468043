//! HTTP transport seam and its hyper-based implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::config::ODataClientConfig;
use crate::error::TransportError;

/// A fully materialized request.
#[derive(Clone, Debug)]
pub struct WireRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A fully read response, whatever its status.
#[derive(Clone, Debug)]
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WireResponse {
    #[must_use]
    pub fn status_text(&self) -> &str {
        self.status.canonical_reason().unwrap_or_default()
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// Sends requests. Implementations return `Ok` for every HTTP status and never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError>;
}

/// hyper-util client over rustls with webpki roots.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
    max_body_size: usize,
    allow_insecure_http: bool,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("timeout", &self.timeout)
            .field("max_body_size", &self.max_body_size)
            .field("allow_insecure_http", &self.allow_insecure_http)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// # Errors
    /// Returns `TransportError::Tls` if the TLS connector cannot be built.
    pub fn new(config: &ODataClientConfig) -> Result<Self, TransportError> {
        let connector = build_https_connector(config.allow_insecure_http)?;
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Ok(Self {
            client,
            timeout: config.request_timeout,
            max_body_size: config.max_body_size,
            allow_insecure_http: config.allow_insecure_http,
        })
    }

    fn validate_url(&self, url: &str) -> Result<http::Uri, TransportError> {
        let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
            TransportError::InvalidUri {
                url: url.to_owned(),
                reason: e.to_string(),
            }
        })?;

        if uri.authority().is_none() {
            return Err(TransportError::InvalidUri {
                url: url.to_owned(),
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") if self.allow_insecure_http => Ok(uri),
            Some("http") => Err(TransportError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required".to_owned(),
            }),
            Some(scheme) => Err(TransportError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(TransportError::InvalidUri {
                url: url.to_owned(),
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    async fn round_trip(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<WireResponse, TransportError> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();

        let collected = Limited::new(body, self.max_body_size)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    TransportError::BodyTooLarge {
                        limit: self.max_body_size,
                    }
                } else {
                    TransportError::Connection(e)
                }
            })?;

        Ok(WireResponse {
            status: parts.status,
            headers: parts.headers,
            body: collected.to_bytes(),
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let uri = self.validate_url(&request.uri)?;

        let mut builder = Request::builder().method(request.method.clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let http_request = builder.body(Full::new(request.body))?;

        tracing::debug!(method = %request.method, url = %request.uri, "Sending OData request");

        match tokio::time::timeout(self.timeout, self.round_trip(http_request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

/// Shared pointer form used by the data service.
pub type SharedTransport = Arc<dyn Transport>;

fn build_https_connector(
    allow_insecure_http: bool,
) -> Result<HttpsConnector<HttpConnector>, TransportError> {
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(provider)
        .map_err(|e| TransportError::Tls(Box::new(e)))?;
    let connector = if allow_insecure_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
