//! The OData v4 data service.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use modkit_edm::{InvokableTable, MetadataCatalog, MetadataResolver};
use serde_json::Value;

use crate::base::{BaseDataService, WebApiDataService};
use crate::batch::{SaveResult, assemble, disassemble};
use crate::config::ODataClientConfig;
use crate::entity::{ExtraMetadataTable, PendingChange};
use crate::error::{ODataError, ODataErrorKind};
use crate::multipart::{decode_batch, encode_batch};
use crate::normalize::{Failure, normalize};
use crate::request::{JSON_CONTENT_TYPE, ODataQuery, RequestBuilder, absolute_url};
use crate::transport::{HyperTransport, SharedTransport, WireRequest, WireResponse};

const ODATA_VERSION: HeaderName = HeaderName::from_static("odata-version");
const ODATA_MAX_VERSION: HeaderName = HeaderName::from_static("odata-maxversion");
const METADATA_ACCEPT: &str = "application/json;odata.metadata=full";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Turns a raw `$metadata` body into a catalog.
pub trait CatalogParser: Send + Sync {
    /// # Errors
    /// Returns an error if the body is not a readable metadata document.
    fn parse(&self, body: &[u8]) -> Result<MetadataCatalog, BoxError>;
}

/// Reads the serde form of [`MetadataCatalog`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCatalogParser;

impl CatalogParser for JsonCatalogParser {
    fn parse(&self, body: &[u8]) -> Result<MetadataCatalog, BoxError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Catalog plus the operations derived from it, built once per load.
#[derive(Debug, Default)]
pub struct ServiceMetadata {
    pub catalog: MetadataCatalog,
    pub invokables: InvokableTable,
}

impl ServiceMetadata {
    #[must_use]
    pub fn new(catalog: MetadataCatalog) -> Self {
        let invokables = InvokableTable::build(&catalog);
        Self {
            catalog,
            invokables,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> MetadataResolver<'_> {
        MetadataResolver::new(&self.catalog)
    }
}

/// Result of a single query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// `value` of a collection response, or the whole body otherwise.
    pub results: Value,
    pub inline_count: Option<u64>,
}

/// OData v4 data service: metadata loading, queries and batched saves.
pub struct ODataDataService {
    root: String,
    batch_path: String,
    metadata_path: String,
    headers: HeaderMap,
    transport: SharedTransport,
    base: Arc<dyn BaseDataService>,
    parser: Arc<dyn CatalogParser>,
    metadata: ArcSwapOption<ServiceMetadata>,
}

impl std::fmt::Debug for ODataDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ODataDataService")
            .field("root", &self.root)
            .field("metadata_loaded", &self.metadata.load().is_some())
            .finish_non_exhaustive()
    }
}

impl ODataDataService {
    /// Service with the default hyper transport.
    ///
    /// # Errors
    /// Returns an error for an invalid configuration or TLS setup failure.
    pub fn new(config: &ODataClientConfig) -> Result<Self, ODataError> {
        config.validate()?;
        let transport = HyperTransport::new(config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Service over a caller-provided transport.
    ///
    /// # Errors
    /// Returns an error for an invalid service root or header.
    pub fn with_transport(
        config: &ODataClientConfig,
        transport: SharedTransport,
    ) -> Result<Self, ODataError> {
        let root = config.normalized_root()?;

        let mut headers = HeaderMap::new();
        headers.insert(ODATA_VERSION, HeaderValue::from_static("4.0"));
        headers.insert(ODATA_MAX_VERSION, HeaderValue::from_static("4.0"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ODataError::configuration(format!("header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ODataError::configuration(format!("header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            root,
            batch_path: config.batch_path.clone(),
            metadata_path: config.metadata_path.clone(),
            headers,
            transport,
            base: Arc::new(WebApiDataService),
            parser: Arc::new(JsonCatalogParser),
            metadata: ArcSwapOption::empty(),
        })
    }

    #[must_use]
    pub fn with_base(mut self, base: Arc<dyn BaseDataService>) -> Self {
        self.base = base;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn CatalogParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Service root, ending with `/`.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolve `url` against the service root.
    #[must_use]
    pub fn absolute_url(&self, url: &str) -> String {
        absolute_url(&self.root, url)
    }

    /// Currently installed metadata, if any.
    #[must_use]
    pub fn metadata(&self) -> Option<Arc<ServiceMetadata>> {
        self.metadata.load_full()
    }

    /// Install a catalog obtained elsewhere.
    pub fn install_metadata(&self, catalog: MetadataCatalog) -> Arc<ServiceMetadata> {
        let metadata = Arc::new(ServiceMetadata::new(catalog));
        self.metadata.store(Some(Arc::clone(&metadata)));
        metadata
    }

    /// Fetch and install the service metadata.
    ///
    /// # Errors
    /// Returns an error prefixed with `Metadata query failed for: {url}; ` when
    /// the request fails, or a metadata resolution error for an empty or
    /// unreadable document.
    pub async fn fetch_metadata(&self) -> Result<Arc<ServiceMetadata>, ODataError> {
        let url = self.absolute_url(&self.metadata_path);
        tracing::debug!(url = %url, "Fetching OData metadata");

        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static(METADATA_ACCEPT));

        let response = self
            .dispatch(Method::GET, &url, headers, Bytes::new())
            .await
            .map_err(|mut err| {
                err.message = format!("Metadata query failed for: {url}; {}", err.message);
                err
            })?;

        if response.body.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!(url = %url, "Empty metadata document");
            return Err(ODataError::new(
                ODataErrorKind::MetadataResolution,
                format!("Metadata query failed for: {url}"),
            )
            .with_url(&url));
        }

        let catalog = self.parser.parse(&response.body).map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Unreadable metadata document");
            ODataError::new(
                ODataErrorKind::MetadataResolution,
                format!(
                    "Metadata query failed for {url}; Unable to process returned metadata: {e}"
                ),
            )
            .with_url(&url)
        })?;

        let metadata = self.install_metadata(catalog);
        tracing::debug!(
            url = %url,
            actions = metadata.invokables.actions().len(),
            functions = metadata.invokables.functions().len(),
            "OData metadata loaded"
        );
        Ok(metadata)
    }

    /// Run a single query.
    ///
    /// # Errors
    /// Returns the normalized error of a failed request, or a protocol error
    /// for a body that is not JSON.
    pub async fn execute_query(&self, query: &ODataQuery) -> Result<QueryResult, ODataError> {
        let metadata = self.metadata().unwrap_or_default();
        let builder = RequestBuilder::new(metadata.resolver(), &metadata.invokables, &self.root);
        let descriptor = builder
            .build_query_request(query)
            .map_err(|e| self.base.catch_no_connection_error(e))?;

        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let body = match &descriptor.body {
            Some(json) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
                Bytes::from(json.to_string())
            }
            None => Bytes::new(),
        };

        let response = self
            .dispatch(descriptor.method, &descriptor.uri, headers, body)
            .await?;

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(QueryResult::default());
        }

        let data: Value = serde_json::from_slice(&response.body).map_err(|e| {
            ODataError::protocol(format!("unreadable query response: {e}"))
                .with_url(&descriptor.uri)
        })?;

        let inline_count = data.get("@odata.count").and_then(|count| match count {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        let results = match data {
            Value::Object(mut map) if map.contains_key("value") => {
                map.remove("value").unwrap_or_default()
            }
            other => other,
        };

        Ok(QueryResult {
            results,
            inline_count,
        })
    }

    /// Save pending changes as one atomic batch.
    ///
    /// Unchanged and detached entities are skipped; with nothing to save no
    /// request is sent.
    ///
    /// # Errors
    /// Returns an error when metadata is not loaded, a request cannot be
    /// built, the batch fails or any part of it fails.
    pub async fn save_changes(
        &self,
        changes: &[PendingChange],
        extra: &ExtraMetadataTable,
    ) -> Result<SaveResult, ODataError> {
        let metadata = self.metadata().ok_or_else(|| {
            ODataError::new(
                ODataErrorKind::MetadataResolution,
                "metadata must be loaded before saving changes",
            )
        })?;
        let resolver = metadata.resolver();
        let builder = RequestBuilder::new(resolver, &metadata.invokables, &self.root);

        let requests = {
            let mut interceptor = self.base.create_change_request_interceptor(changes);
            let mut requests = Vec::new();
            for (index, change) in changes.iter().enumerate() {
                if let Some(request) = builder.build_change_request(change, extra)? {
                    requests.push(interceptor.get_request(request, change, index));
                }
            }
            interceptor.done(&requests);
            requests
        };

        let url = self.absolute_url(&self.batch_path);
        if requests.is_empty() {
            let skipped = changes.iter().filter(|c| !c.state.is_save_worthy()).count();
            tracing::debug!(url = %url, skipped, "Nothing to save");
            return Ok(SaveResult::default());
        }

        let envelope = assemble(requests);
        let encoded = encode_batch(&envelope);
        tracing::debug!(url = %url, parts = envelope.len(), "Saving change set");

        let mut headers = self.headers.clone();
        let content_type = HeaderValue::from_str(&encoded.content_type)
            .map_err(|e| ODataError::protocol(format!("invalid batch content type: {e}")))?;
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(ACCEPT, HeaderValue::from_static("multipart/mixed"));

        let response = self
            .dispatch(Method::POST, &url, headers, Bytes::from(encoded.body))
            .await?;

        let parts = decode_batch(response.content_type(), &response.body)
            .map_err(|e| e.with_url(&url))?;
        disassemble(&envelope, &parts, &resolver, extra, &url)
    }

    /// Send one request; non-success statuses and transport failures come
    /// back normalized.
    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<WireResponse, ODataError> {
        let request = WireRequest {
            method,
            uri: url.to_owned(),
            headers,
            body,
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "OData request did not complete");
                let normalized = normalize(Failure::Transport(&err), url);
                return Err(self.base.catch_no_connection_error(normalized));
            }
        };

        if response.status.is_success() {
            return Ok(response);
        }

        tracing::debug!(url = %url, status = %response.status, "OData request failed");
        let normalized = normalize(
            Failure::Response {
                status: Some(response.status),
                status_text: response.status_text(),
                body: &response.body,
            },
            url,
        );
        Err(self.base.catch_no_connection_error(normalized))
    }
}
