//! Metadata resolution: resource paths, key literals and structural serialization.

use serde_json::{Map, Value};

use crate::catalog::{MetadataCatalog, PropertyDef, TypeRef, item_type_name};
use crate::literal::{self, FormatError};
use crate::naming::NamingConvention;

/// A type, key or operation name that cannot be matched against the catalog.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataResolutionError {
    #[error("unknown structural type: {0}")]
    UnknownType(String),

    #[error("'{0}' is not an entity type")]
    NotAnEntityType(String),

    #[error("entity type '{0}' has no resource name")]
    MissingResourceName(String),

    #[error("entity type '{0}' declares no key")]
    MissingKey(String),

    #[error("key property '{property}' of '{type_name}' is not a declared primitive property")]
    InvalidKeyProperty { type_name: String, property: String },

    #[error("missing value for key property '{property}' of '{type_name}'")]
    MissingKeyValue { type_name: String, property: String },

    #[error("binding type '{0}' does not resolve to an entity set")]
    UnknownBindingType(String),

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Answers name and path questions against a [`MetadataCatalog`].
#[derive(Clone, Copy, Debug)]
pub struct MetadataResolver<'a> {
    catalog: &'a MetadataCatalog,
}

impl<'a> MetadataResolver<'a> {
    #[must_use]
    pub fn new(catalog: &'a MetadataCatalog) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &'a MetadataCatalog {
        self.catalog
    }

    #[must_use]
    pub fn naming(&self) -> NamingConvention {
        self.catalog.naming
    }

    /// Entity or complex type for a short, qualified or collection name.
    #[must_use]
    pub fn edm_type(&self, type_name: &str) -> Option<TypeRef<'a>> {
        self.catalog.find_structural(type_name)
    }

    /// Like [`Self::edm_type`] but requires an entity type.
    ///
    /// # Errors
    /// Returns `UnknownType` or `NotAnEntityType`.
    pub fn entity_type(&self, type_name: &str) -> Result<TypeRef<'a>, MetadataResolutionError> {
        let ty = self
            .edm_type(type_name)
            .ok_or_else(|| MetadataResolutionError::UnknownType(type_name.to_owned()))?;
        if ty.is_entity() {
            Ok(ty)
        } else {
            Err(MetadataResolutionError::NotAnEntityType(ty.qualified_name()))
        }
    }

    /// Default resource path (entity set) of an entity type.
    ///
    /// # Errors
    /// Returns an error if the type is unknown, not an entity type, or has no resource name.
    pub fn resource_path(&self, type_name: &str) -> Result<String, MetadataResolutionError> {
        let ty = self.entity_type(type_name)?;
        ty.def
            .resource_name
            .clone()
            .ok_or_else(|| MetadataResolutionError::MissingResourceName(ty.qualified_name()))
    }

    /// Key segment for an entity: `Orders(42)` or `Lines(OrderId=42,LineNo=1)`.
    ///
    /// `values` holds the entity's current property values under client names.
    ///
    /// # Errors
    /// Returns an error if the type cannot be resolved, a key value is missing,
    /// or a key value cannot be formatted.
    pub fn key_literal(
        &self,
        type_name: &str,
        values: &Map<String, Value>,
    ) -> Result<String, MetadataResolutionError> {
        let resource = self.resource_path(type_name)?;
        let ty = self.entity_type(type_name)?;
        let keys = self.key_properties(ty)?;

        let mut parts = Vec::with_capacity(keys.len());
        for prop in &keys {
            let client = self.naming().server_to_client(&prop.name);
            let value = values.get(&client).ok_or_else(|| {
                MetadataResolutionError::MissingKeyValue {
                    type_name: ty.qualified_name(),
                    property: prop.name.clone(),
                }
            })?;
            let primitive = prop.primitive().ok_or_else(|| invalid_key(ty, &prop.name))?;
            parts.push((prop.name.as_str(), literal::format_uri_literal(primitive, value)?));
        }

        let inner = match parts.as_slice() {
            [(_, single)] => single.clone(),
            _ => parts
                .iter()
                .map(|(name, v)| format!("{name}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        };

        Ok(format!("{resource}({inner})"))
    }

    /// Client-side key values in declared key order (absent values become `null`).
    ///
    /// # Errors
    /// Returns an error if the type cannot be resolved or declares no key.
    pub fn key_values(
        &self,
        type_name: &str,
        values: &Map<String, Value>,
    ) -> Result<Vec<Value>, MetadataResolutionError> {
        let ty = self.entity_type(type_name)?;
        let keys = self.key_properties(ty)?;
        Ok(keys
            .iter()
            .map(|prop| {
                values
                    .get(&self.naming().server_to_client(&prop.name))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect())
    }

    /// Key values of a raw server payload (server names), parsed to client form.
    ///
    /// # Errors
    /// Returns an error if the type cannot be resolved, a key is absent from the
    /// payload, or a key value does not match its declared type.
    pub fn extract_key(
        &self,
        type_name: &str,
        raw: &Map<String, Value>,
    ) -> Result<Vec<Value>, MetadataResolutionError> {
        let ty = self.entity_type(type_name)?;
        let keys = self.key_properties(ty)?;
        keys.iter()
            .map(|prop| -> Result<Value, MetadataResolutionError> {
                let value = raw.get(&prop.name).ok_or_else(|| {
                    MetadataResolutionError::MissingKeyValue {
                        type_name: ty.qualified_name(),
                        property: prop.name.clone(),
                    }
                })?;
                let primitive = prop.primitive().ok_or_else(|| invalid_key(ty, &prop.name))?;
                Ok(literal::parse_json(primitive, value)?)
            })
            .collect()
    }

    /// True iff every field name round-trips through the naming convention.
    #[must_use]
    pub fn validate_property_names(&self, payload: &Map<String, Value>) -> bool {
        let naming = self.naming();
        payload.keys().all(|name| naming.round_trips(name))
    }

    /// Serialize a structural instance to its wire shape.
    ///
    /// Declared properties only, in declared order. Unmapped properties are
    /// dropped, names are converted to server names and primitive values go
    /// through the literal formatter. When `only` is set, properties whose
    /// client name is not listed are skipped.
    ///
    /// # Errors
    /// Returns a [`FormatError`] (wrapped) for any value that cannot be encoded.
    pub fn to_wire(
        &self,
        ty: TypeRef<'_>,
        values: &Map<String, Value>,
        only: Option<&[String]>,
    ) -> Result<Map<String, Value>, MetadataResolutionError> {
        let naming = self.naming();
        let mut out = Map::new();

        for prop in ty.def.properties.iter().filter(|p| !p.unmapped) {
            let client = naming.server_to_client(&prop.name);
            if only.is_some_and(|names| !names.iter().any(|n| *n == client)) {
                continue;
            }
            let Some(value) = values.get(&client) else {
                continue;
            };
            out.insert(prop.name.clone(), self.property_to_wire(prop, value)?);
        }

        Ok(out)
    }

    fn property_to_wire(
        &self,
        prop: &PropertyDef,
        value: &Value,
    ) -> Result<Value, MetadataResolutionError> {
        if let Some(primitive) = prop.primitive() {
            return match value {
                Value::Array(items) if prop.is_collection() => items
                    .iter()
                    .map(|v| {
                        literal::format_json(primitive, v).map_err(MetadataResolutionError::from)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Ok(literal::format_json(primitive, value)?),
            };
        }

        let Some(nested) = self.edm_type(item_type_name(&prop.type_name)) else {
            // enum or type definition: sent as-is
            return Ok(value.clone());
        };

        match value {
            Value::Object(map) => Ok(Value::Object(self.to_wire(nested, map, None)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => self.to_wire(nested, map, None).map(Value::Object),
                    other => Ok(other.clone()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn key_properties(
        &self,
        ty: TypeRef<'a>,
    ) -> Result<Vec<&'a PropertyDef>, MetadataResolutionError> {
        if ty.def.key.is_empty() {
            return Err(MetadataResolutionError::MissingKey(ty.qualified_name()));
        }
        ty.def
            .key
            .iter()
            .map(|name| ty.def.property(name).ok_or_else(|| invalid_key(ty, name)))
            .collect()
    }
}

fn invalid_key(ty: TypeRef<'_>, property: &str) -> MetadataResolutionError {
    MetadataResolutionError::InvalidKeyProperty {
        type_name: ty.qualified_name(),
        property: property.to_owned(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> MetadataCatalog {
        serde_json::from_value(json!({
            "naming": "camelCase",
            "schemas": [{
                "namespace": "Demo",
                "entityTypes": [
                    {
                        "name": "Customer",
                        "resourceName": "Customers",
                        "key": ["Id"],
                        "keyGeneration": "identity",
                        "properties": [
                            {"name": "Id", "type": "Edm.Int32"},
                            {"name": "Name", "type": "Edm.String"},
                            {"name": "Balance", "type": "Edm.Decimal"},
                            {"name": "Address", "type": "Demo.Address"},
                            {"name": "Tags", "type": "Collection(Edm.String)"},
                            {"name": "IsSelected", "type": "Edm.Boolean", "unmapped": true}
                        ]
                    },
                    {
                        "name": "OrderLine",
                        "resourceName": "OrderLines",
                        "key": ["OrderId", "Region"],
                        "properties": [
                            {"name": "OrderId", "type": "Edm.Int64"},
                            {"name": "Region", "type": "Edm.String"},
                            {"name": "Quantity", "type": "Edm.Int32"}
                        ]
                    },
                    {
                        "name": "Orphan",
                        "key": ["Id"],
                        "properties": [{"name": "Id", "type": "Edm.Guid"}]
                    }
                ],
                "complexTypes": [{
                    "name": "Address",
                    "properties": [
                        {"name": "City", "type": "Edm.String"},
                        {"name": "Since", "type": "Edm.DateTimeOffset"}
                    ]
                }]
            }]
        }))
        .unwrap()
    }

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn resource_path_requires_entity_set() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        assert_eq!(r.resource_path("Demo.Customer").unwrap(), "Customers");
        assert_eq!(
            r.resource_path("Orphan").unwrap_err(),
            MetadataResolutionError::MissingResourceName("Demo.Orphan".to_owned())
        );
        assert_eq!(
            r.resource_path("Address").unwrap_err(),
            MetadataResolutionError::NotAnEntityType("Demo.Address".to_owned())
        );
        assert!(matches!(
            r.resource_path("Nope"),
            Err(MetadataResolutionError::UnknownType(_))
        ));
    }

    #[test]
    fn single_key_literal() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let lit = r
            .key_literal("Customer", &map(json!({"id": 7, "name": "x"})))
            .unwrap();
        assert_eq!(lit, "Customers(7)");
    }

    #[test]
    fn composite_key_literal_uses_declared_order_and_server_names() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let lit = r
            .key_literal(
                "OrderLine",
                &map(json!({"region": "EU", "quantity": 3, "orderId": "42"})),
            )
            .unwrap();
        assert_eq!(lit, "OrderLines(OrderId=42,Region='EU')");
    }

    #[test]
    fn missing_key_value_is_reported() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let err = r
            .key_literal("OrderLine", &map(json!({"orderId": 1})))
            .unwrap_err();
        assert_eq!(
            err,
            MetadataResolutionError::MissingKeyValue {
                type_name: "Demo.OrderLine".to_owned(),
                property: "Region".to_owned(),
            }
        );
    }

    #[test]
    fn to_wire_drops_unmapped_and_formats_values() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let ty = r.edm_type("Customer").unwrap();
        let wire = r
            .to_wire(
                ty,
                &map(json!({
                    "id": -1,
                    "name": "Ann",
                    "balance": 10.5,
                    "isSelected": true,
                    "tags": ["a", "b"],
                    "address": {"city": "Oslo", "since": "2020-01-01T01:00:00+01:00"},
                    "notDeclared": 1
                })),
                None,
            )
            .unwrap();
        assert_eq!(
            Value::Object(wire),
            json!({
                "Id": -1,
                "Name": "Ann",
                "Balance": "10.5",
                "Address": {"City": "Oslo", "Since": "2020-01-01T00:00:00.000Z"},
                "Tags": ["a", "b"]
            })
        );
    }

    #[test]
    fn to_wire_with_changed_fields_only() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let ty = r.edm_type("Customer").unwrap();
        let changed = vec!["name".to_owned()];
        let wire = r
            .to_wire(ty, &map(json!({"id": 3, "name": "Bo"})), Some(changed.as_slice()))
            .unwrap();
        assert_eq!(Value::Object(wire), json!({"Name": "Bo"}));
    }

    #[test]
    fn to_wire_surfaces_format_errors() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let ty = r.edm_type("Customer").unwrap();
        let err = r
            .to_wire(ty, &map(json!({"balance": "lots"})), None)
            .unwrap_err();
        assert!(matches!(err, MetadataResolutionError::Format(ref f) if f.expected == "decimal"));
    }

    #[test]
    fn extract_key_parses_server_values() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let key = r
            .extract_key("OrderLine", &map(json!({"OrderId": "9000", "Region": "US"})))
            .unwrap();
        assert_eq!(key, vec![json!(9000), json!("US")]);
    }

    #[test]
    fn property_names_must_round_trip() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        assert!(r.validate_property_names(&map(json!({"name": 1, "orderId": 2}))));
        assert!(!r.validate_property_names(&map(json!({"Name": 1}))));
    }
}
