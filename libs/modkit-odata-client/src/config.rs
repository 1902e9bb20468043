//! Client configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::ODataError;

/// Default maximum response body size (16 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// OData client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ODataClientConfig {
    /// Absolute service root, e.g. `https://host/odata/`.
    pub service_root: String,

    /// Batch endpoint, relative to the service root or absolute.
    pub batch_path: String,

    /// Metadata document, relative to the service root or absolute.
    pub metadata_path: String,

    /// Per-request timeout (humantime, e.g. `30s`).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum response body size in bytes.
    pub max_body_size: usize,

    /// Allow plain `http://` service roots.
    pub allow_insecure_http: bool,

    /// Static headers added to every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for ODataClientConfig {
    fn default() -> Self {
        Self {
            service_root: String::new(),
            batch_path: "$batch".to_owned(),
            metadata_path: "$metadata".to_owned(),
            request_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            allow_insecure_http: false,
            headers: BTreeMap::new(),
        }
    }
}

impl ODataClientConfig {
    /// Config for a service root with defaults everywhere else.
    #[must_use]
    pub fn for_service(service_root: impl Into<String>) -> Self {
        Self {
            service_root: service_root.into(),
            ..Self::default()
        }
    }

    /// The service root, guaranteed to end with `/`.
    ///
    /// # Errors
    /// Returns a configuration error if the root is not an absolute URI.
    pub fn normalized_root(&self) -> Result<String, ODataError> {
        let root = self.service_root.trim();
        let uri: http::Uri = root.parse().map_err(|e: http::uri::InvalidUri| {
            ODataError::configuration(format!("invalid service root '{root}': {e}"))
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(ODataError::configuration(format!(
                "service root '{root}' must be an absolute URI"
            )));
        }

        if root.ends_with('/') {
            Ok(root.to_owned())
        } else {
            Ok(format!("{root}/"))
        }
    }

    /// # Errors
    /// Returns a configuration error for a bad service root, scheme, limit or header.
    pub fn validate(&self) -> Result<(), ODataError> {
        let root = self.normalized_root()?;
        if root.starts_with("http://") && !self.allow_insecure_http {
            return Err(ODataError::configuration(
                "plain http service root requires allow_insecure_http",
            ));
        }
        if self.max_body_size == 0 {
            return Err(ODataError::configuration("max_body_size must be positive"));
        }
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ODataError::configuration(format!("header '{name}': {e}")))?;
            HeaderValue::from_str(value)
                .map_err(|e| ODataError::configuration(format!("header '{name}': {e}")))?;
        }
        Ok(())
    }
}
