//! Bound and unbound operation lookup.

use serde_json::{Map, Value};

use crate::catalog::{MetadataCatalog, OperationDef, ParameterDef};
use crate::resolver::{MetadataResolutionError, MetadataResolver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokableKind {
    Action,
    Function,
}

/// A resolved action or function together with its invocation URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvokableEntry {
    pub kind: InvokableKind,
    pub name: String,
    pub namespace: String,
    /// Type of the binding parameter, `None` for unbound operations.
    pub binding: Option<String>,
    pub parameters: Vec<ParameterDef>,
    /// Relative URL: `{ns}.{name}` or `{boundResourcePath}/{ns}.{name}`.
    pub url: String,
}

impl InvokableEntry {
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    fn matches(&self, name: &str) -> bool {
        self.name == name
            || name
                .strip_prefix(self.namespace.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|short| short == self.name)
    }

    /// Parameters after the binding parameter.
    fn payload_parameters(&self) -> &[ParameterDef] {
        let skip = usize::from(self.is_bound()).min(self.parameters.len());
        &self.parameters[skip..]
    }
}

/// All actions and functions of a catalog, built once per metadata load.
#[derive(Clone, Debug, Default)]
pub struct InvokableTable {
    actions: Vec<InvokableEntry>,
    functions: Vec<InvokableEntry>,
}

impl InvokableTable {
    /// Build the table. A bound operation whose binding type cannot be
    /// resolved to an entity set is kept with an unprefixed URL.
    #[must_use]
    pub fn build(catalog: &MetadataCatalog) -> Self {
        let resolver = MetadataResolver::new(catalog);
        let mut table = Self::default();

        for schema in &catalog.schemas {
            for op in &schema.actions {
                table
                    .actions
                    .push(entry(&resolver, &schema.namespace, op, InvokableKind::Action));
            }
            for op in &schema.functions {
                table
                    .functions
                    .push(entry(&resolver, &schema.namespace, op, InvokableKind::Function));
            }
        }

        tracing::debug!(
            actions = table.actions.len(),
            functions = table.functions.len(),
            "Invokable table built"
        );
        table
    }

    #[must_use]
    pub fn actions(&self) -> &[InvokableEntry] {
        &self.actions
    }

    #[must_use]
    pub fn functions(&self) -> &[InvokableEntry] {
        &self.functions
    }

    /// Find the operation addressed by a resource path.
    ///
    /// The last path segment (argument list and query string removed) is the
    /// operation name, optionally namespace-qualified. Bound actions win over
    /// bound functions, which win over unbound actions, then unbound functions.
    #[must_use]
    pub fn resolve(&self, resource_path: &str) -> Option<&InvokableEntry> {
        let name = operation_name(resource_path);
        if name.is_empty() {
            return None;
        }

        let bound = |e: &&InvokableEntry| e.is_bound() && e.matches(name);
        let unbound = |e: &&InvokableEntry| !e.is_bound() && e.matches(name);

        self.actions
            .iter()
            .find(bound)
            .or_else(|| self.functions.iter().find(bound))
            .or_else(|| self.actions.iter().find(unbound))
            .or_else(|| self.functions.iter().find(unbound))
    }
}

fn operation_name(resource_path: &str) -> &str {
    let path = resource_path
        .split_once('?')
        .map_or(resource_path, |(path, _)| path);
    let last = path.rsplit('/').next().unwrap_or(path);
    last.split_once('(').map_or(last, |(name, _)| name).trim()
}

fn entry(
    resolver: &MetadataResolver<'_>,
    namespace: &str,
    op: &OperationDef,
    kind: InvokableKind,
) -> InvokableEntry {
    let binding = if op.is_bound {
        op.parameters.first().map(|p| p.type_name.clone())
    } else {
        None
    };

    let url = match invocation_url(resolver, namespace, &op.name, binding.as_deref()) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(
                operation = %op.name,
                error = %err,
                "Bound operation without entity set"
            );
            format!("{namespace}.{}", op.name)
        }
    };

    InvokableEntry {
        kind,
        name: op.name.clone(),
        namespace: namespace.to_owned(),
        binding,
        parameters: op.parameters.clone(),
        url,
    }
}

/// Invocation URL of an operation.
///
/// # Errors
/// Returns `UnknownBindingType` when a binding type does not resolve to an
/// entity type with a resource name.
pub fn invocation_url(
    resolver: &MetadataResolver<'_>,
    namespace: &str,
    name: &str,
    binding: Option<&str>,
) -> Result<String, MetadataResolutionError> {
    let Some(binding) = binding else {
        return Ok(format!("{namespace}.{name}"));
    };
    let bound = resolver
        .resource_path(binding)
        .map_err(|_| MetadataResolutionError::UnknownBindingType(binding.to_owned()))?;
    Ok(format!("{bound}/{namespace}.{name}"))
}

/// Shape an operation payload after its first structural parameter.
///
/// The first non-primitive parameter after the binding parameter whose type
/// resolves to an entity or complex type decides the shape. Without one, the
/// payload is returned unchanged.
///
/// # Errors
/// Returns an error if a property value cannot be formatted.
pub fn reshape_payload(
    entry: &InvokableEntry,
    raw: &Value,
    resolver: &MetadataResolver<'_>,
) -> Result<Value, MetadataResolutionError> {
    let target = entry
        .payload_parameters()
        .iter()
        .filter(|p| !p.is_primitive())
        .find_map(|p| resolver.edm_type(&p.type_name));

    let Some(ty) = target else {
        return Ok(raw.clone());
    };

    let shape = |map: &Map<String, Value>| resolver.to_wire(ty, map, None).map(Value::Object);
    match raw {
        Value::Object(map) => shape(map),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => shape(map),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
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
                "entityTypes": [{
                    "name": "Customer",
                    "resourceName": "Customers",
                    "key": ["Id"],
                    "properties": [
                        {"name": "Id", "type": "Edm.Int32"},
                        {"name": "Credit", "type": "Edm.Int64"},
                        {"name": "Flag", "type": "Edm.Boolean", "unmapped": true}
                    ]
                }],
                "complexTypes": [{
                    "name": "Address",
                    "properties": [{"name": "City", "type": "Edm.String"}]
                }],
                "actions": [
                    {
                        "name": "Promote",
                        "isBound": true,
                        "parameters": [
                            {"name": "customer", "type": "Demo.Customer"},
                            {"name": "Level", "type": "Edm.Int32"}
                        ]
                    },
                    {
                        "name": "Relocate",
                        "parameters": [
                            {"name": "Note", "type": "Edm.String"},
                            {"name": "Address", "type": "Demo.Address"}
                        ]
                    },
                    {
                        "name": "Import",
                        "parameters": [{"name": "items", "type": "Collection(Demo.Customer)"}]
                    },
                    {
                        "name": "Orphaned",
                        "isBound": true,
                        "parameters": [{"name": "x", "type": "Demo.Address"}]
                    }
                ],
                "functions": [
                    {
                        "name": "GetTotal",
                        "parameters": [{"name": "year", "type": "Edm.Int32"}],
                        "returnType": "Edm.Decimal"
                    },
                    {
                        "name": "Promote",
                        "parameters": []
                    }
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn urls_for_bound_and_unbound_operations() {
        let table = InvokableTable::build(&catalog());
        let urls: Vec<_> = table.actions().iter().map(|a| a.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "Customers/Demo.Promote",
                "Demo.Relocate",
                "Demo.Import",
                "Demo.Orphaned"
            ]
        );
        assert_eq!(table.functions()[0].url, "Demo.GetTotal");
    }

    #[test]
    fn resolve_prefers_bound_and_strips_arguments() {
        let table = InvokableTable::build(&catalog());

        let hit = table.resolve("Customers(1)/Demo.Promote").unwrap();
        assert_eq!(hit.kind, InvokableKind::Action);
        assert!(hit.is_bound());

        let f = table.resolve("GetTotal(year=2024)?$top=1").unwrap();
        assert_eq!(f.kind, InvokableKind::Function);
        assert_eq!(f.qualified_name(), "Demo.GetTotal");

        assert!(table.resolve("Customers").is_none());
        assert!(table.resolve("").is_none());
        assert!(table.resolve("Other.GetTotal").is_none());
    }

    #[test]
    fn unresolved_binding_is_reported() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        assert_eq!(
            invocation_url(&r, "Demo", "Orphaned", Some("Demo.Address")).unwrap_err(),
            MetadataResolutionError::UnknownBindingType("Demo.Address".to_owned())
        );
    }

    #[test]
    fn primitive_parameters_leave_payload_unchanged() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let table = InvokableTable::build(&c);
        let entry = table.resolve("GetTotal").unwrap();
        let raw = json!({"year": 2024, "Whatever": true});
        assert_eq!(reshape_payload(entry, &raw, &r).unwrap(), raw);

        // binding parameter is never used for shaping
        let bound = table.resolve("Customers(1)/Promote").unwrap();
        let raw = json!({"level": 3});
        assert_eq!(reshape_payload(bound, &raw, &r).unwrap(), raw);
    }

    #[test]
    fn structural_parameter_shapes_payload() {
        let c = catalog();
        let r = MetadataResolver::new(&c);
        let table = InvokableTable::build(&c);

        let relocate = table.resolve("Relocate").unwrap();
        let shaped = reshape_payload(relocate, &json!({"city": "Rome"}), &r).unwrap();
        assert_eq!(shaped, json!({"City": "Rome"}));

        let import = table.resolve("Demo.Import").unwrap();
        let shaped = reshape_payload(
            import,
            &json!([{"id": 1, "credit": 5, "flag": true}, {"id": 2}]),
            &r,
        )
        .unwrap();
        assert_eq!(shaped, json!([{"Id": 1, "Credit": "5"}, {"Id": 2}]));
    }
}
