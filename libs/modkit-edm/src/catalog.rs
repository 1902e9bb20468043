//! Read-only metadata catalog.
//!
//! The catalog is the in-memory view of a service's CSDL document: structural
//! types with their keys and properties, plus actions and functions. Names are
//! kept exactly as the server declares them; client names are derived through
//! the catalog's [`NamingConvention`].

use serde::{Deserialize, Serialize};

use crate::literal::EdmPrimitive;
use crate::naming::NamingConvention;

/// Whole-service metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataCatalog {
    #[serde(default)]
    pub naming: NamingConvention,
    #[serde(default)]
    pub schemas: Vec<SchemaDef>,
}

/// One CSDL schema (a namespace).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchemaDef {
    pub namespace: String,
    #[serde(default)]
    pub entity_types: Vec<StructuralType>,
    #[serde(default)]
    pub complex_types: Vec<StructuralType>,
    #[serde(default)]
    pub actions: Vec<OperationDef>,
    #[serde(default)]
    pub functions: Vec<OperationDef>,
}

/// How an entity type's key is generated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyGeneration {
    /// The client supplies the key.
    #[default]
    None,
    /// The store assigns the key on insert.
    Identity,
    /// A server-side generator assigns the key.
    KeyGenerator,
}

/// Entity or complex type definition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StructuralType {
    pub name: String,
    /// Entity set used as the default resource path.
    #[serde(default)]
    pub resource_name: Option<String>,
    /// Key property names in declared order.
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub key_generation: KeyGeneration,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

impl StructuralType {
    #[must_use]
    pub fn property(&self, server_name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == server_name)
    }
}

/// Structural property.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropertyDef {
    pub name: String,
    /// `Edm.*`, a qualified structural name, or `Collection(...)` of either.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Client-only property, never sent to the server.
    #[serde(default)]
    pub unmapped: bool,
}

fn default_nullable() -> bool {
    true
}

impl PropertyDef {
    /// Primitive type of the property (or of its collection items).
    #[must_use]
    pub fn primitive(&self) -> Option<EdmPrimitive> {
        EdmPrimitive::from_edm_name(item_type_name(&self.type_name))
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.type_name.starts_with("Collection(")
    }
}

/// Action or function definition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OperationDef {
    pub name: String,
    #[serde(default)]
    pub is_bound: bool,
    /// Parameters in declared order; the binding parameter comes first.
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub return_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ParameterDef {
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.type_name.starts_with("Edm.")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructuralKind {
    Entity,
    Complex,
}

/// A structural type together with the schema it was found in.
#[derive(Clone, Copy, Debug)]
pub struct TypeRef<'a> {
    pub namespace: &'a str,
    pub kind: StructuralKind,
    pub def: &'a StructuralType,
}

impl TypeRef<'_> {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.def.name)
    }

    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.kind == StructuralKind::Entity
    }
}

/// Strip a `Collection(...)` wrapper, if any.
#[must_use]
pub fn item_type_name(type_name: &str) -> &str {
    type_name
        .strip_prefix("Collection(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(type_name)
}

fn find_in<'a>(
    schema: &'a SchemaDef,
    kind: StructuralKind,
    types: &'a [StructuralType],
    short: &str,
) -> Option<TypeRef<'a>> {
    types.iter().find(|t| t.name == short).map(|def| TypeRef {
        namespace: schema.namespace.as_str(),
        kind,
        def,
    })
}

impl MetadataCatalog {
    /// Find an entity or complex type by short, qualified or collection name.
    #[must_use]
    pub fn find_structural(&self, type_name: &str) -> Option<TypeRef<'_>> {
        let wanted = item_type_name(type_name);
        self.schemas.iter().find_map(|schema| {
            let short = match wanted.strip_prefix(schema.namespace.as_str()) {
                Some(rest) if rest.starts_with('.') => &rest[1..],
                _ => wanted,
            };
            find_in(schema, StructuralKind::Entity, &schema.entity_types, short)
                .or_else(|| find_in(schema, StructuralKind::Complex, &schema.complex_types, short))
        })
    }
}
