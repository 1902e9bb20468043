#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! EDM support for `ModKit` OData clients
//!
//! This crate covers the type side of an OData v4 service:
//! - Primitive literal formatting for JSON bodies and URI key segments
//! - A read-only metadata catalog of entity/complex types and operations
//! - Resource path, key literal and structural payload resolution
//! - Action and function lookup with invocation URLs
//!
//! Int64 and Decimal values are always written as JSON strings, matching the
//! `IEEE754Compatible=true` content type parameter used by the client.

pub mod catalog;
pub mod invokable;
pub mod literal;
pub mod naming;
pub mod resolver;

pub use catalog::{
    KeyGeneration, MetadataCatalog, OperationDef, ParameterDef, PropertyDef, SchemaDef,
    StructuralKind, StructuralType, TypeRef,
};
pub use invokable::{InvokableEntry, InvokableKind, InvokableTable, reshape_payload};
pub use literal::{EdmPrimitive, FormatError};
pub use naming::NamingConvention;
pub use resolver::{MetadataResolutionError, MetadataResolver};
