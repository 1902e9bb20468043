#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! OData v4 client for `ModKit`
//!
//! Talks to an OData v4 service described by a [`MetadataCatalog`](modkit_edm::MetadataCatalog):
//! - Metadata loading from `$metadata`
//! - Queries, including bound and unbound action/function invocation
//! - Atomic saves through a single `$batch` change set
//! - Server errors flattened into one [`ODataError`]
//!
//! Int64 and Decimal values travel as strings (`IEEE754Compatible=true`).
//!
//! # Example
//!
//! ```ignore
//! use modkit_odata_client::{ExtraMetadataTable, ODataClientConfig, ODataDataService, ODataQuery, PendingChange};
//!
//! let service = ODataDataService::new(&ODataClientConfig::for_service("https://example.com/odata/"))?;
//! service.fetch_metadata().await?;
//!
//! let customers = service.execute_query(&ODataQuery::new("Customers")).await?;
//!
//! let extra = ExtraMetadataTable::new();
//! let saved = service
//!     .save_changes(&[PendingChange::added("Customer", values)], &extra)
//!     .await?;
//! for mapping in &saved.key_mappings {
//!     println!("{} {} -> {}", mapping.entity_type_name, mapping.temp_value, mapping.real_value);
//! }
//! ```

pub mod base;
pub mod batch;
mod config;
mod entity;
mod error;
pub mod multipart;
mod normalize;
pub mod request;
mod service;
mod transport;

pub use base::{BaseDataService, ChangeRequestInterceptor, NO_CONNECTION_MESSAGE, WebApiDataService};
pub use batch::{BatchEnvelope, KeyMapping, PartResponse, SaveResult, SavedEntity};
pub use config::{DEFAULT_MAX_BODY_SIZE, ODataClientConfig};
pub use entity::{EntityId, EntityState, ExtraMetadata, ExtraMetadataTable, PendingChange};
pub use error::{ODataError, ODataErrorKind, TransportError};
pub use normalize::{Failure, normalize};
pub use request::{ChangeRequest, ODataQuery, RequestBuilder, RequestDescriptor};
pub use service::{
    BoxError, CatalogParser, JsonCatalogParser, ODataDataService, QueryResult, ServiceMetadata,
};
pub use transport::{HyperTransport, SharedTransport, Transport, WireRequest, WireResponse};
