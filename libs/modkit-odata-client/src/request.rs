//! Per-entity change requests and single query requests.

use http::{HeaderMap, HeaderValue, Method, header};
use modkit_edm::{InvokableTable, MetadataResolver, reshape_payload};
use serde_json::{Map, Value};

use crate::entity::{EntityId, EntityState, ExtraMetadataTable, PendingChange};
use crate::error::ODataError;

/// Content type of every JSON body sent by the client.
pub const JSON_CONTENT_TYPE: &str = "application/json;IEEE754Compatible=true";

/// Query parameter overriding the HTTP verb of a query.
pub const METHOD_PARAMETER: &str = "$method";

/// Query parameter carrying the body of a non-GET query.
pub const DATA_PARAMETER: &str = "$data";

/// The entity a change request was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeOrigin {
    pub entity: EntityId,
    pub type_name: String,
    pub state: EntityState,
    /// First key value of an added entity, before the server assigns one.
    pub temp_key: Option<Value>,
    /// Client values at the time the request was built.
    pub values: Map<String, Value>,
}

/// One request inside a change set.
#[derive(Clone, Debug)]
pub struct ChangeRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub origin: ChangeOrigin,
}

/// A single (non-batched) request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub uri: String,
    pub body: Option<Value>,
}

/// A query: resource path (with any query string already applied) plus
/// free-form parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ODataQuery {
    pub resource: String,
    pub parameters: Option<Map<String, Value>>,
}

impl ODataQuery {
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            parameters: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }
}

/// Builds requests against a resolved metadata view.
#[derive(Clone, Copy, Debug)]
pub struct RequestBuilder<'a> {
    resolver: MetadataResolver<'a>,
    invokables: &'a InvokableTable,
    route: &'a str,
}

impl<'a> RequestBuilder<'a> {
    /// `route` is the absolute service root ending with `/`.
    #[must_use]
    pub fn new(
        resolver: MetadataResolver<'a>,
        invokables: &'a InvokableTable,
        route: &'a str,
    ) -> Self {
        Self {
            resolver,
            invokables,
            route,
        }
    }

    /// Prefix `url` with the route unless it is already absolute.
    #[must_use]
    pub fn absolute_url(&self, url: &str) -> String {
        absolute_url(self.route, url)
    }

    /// Build the change-set request for one pending change.
    ///
    /// Returns `None` for unchanged and detached entities.
    ///
    /// # Errors
    /// Returns an error if the entity type, its key or one of its values
    /// cannot be resolved or formatted.
    pub fn build_change_request(
        &self,
        change: &PendingChange,
        extra: &ExtraMetadataTable,
    ) -> Result<Option<ChangeRequest>, ODataError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

        let mut origin = ChangeOrigin {
            entity: change.id,
            type_name: change.type_name.clone(),
            state: change.state,
            temp_key: None,
            values: change.values.clone(),
        };

        let (method, uri, body) = match change.state {
            EntityState::Added => {
                let ty = self.resolver.entity_type(&change.type_name)?;
                let resource = match &change.resource_name {
                    Some(name) => name.clone(),
                    None => self.resolver.resource_path(&change.type_name)?,
                };
                let body = self.resolver.to_wire(ty, &change.values, None)?;
                origin.temp_key = self
                    .resolver
                    .key_values(&change.type_name, &change.values)?
                    .into_iter()
                    .next();
                (Method::POST, format!("{}{resource}", self.route), Some(Value::Object(body)))
            }
            EntityState::Modified => {
                let ty = self.resolver.entity_type(&change.type_name)?;
                let uri = self.entity_uri(change, extra, &mut headers)?;
                let body = self
                    .resolver
                    .to_wire(ty, &change.values, Some(change.changed.as_slice()))?;
                (Method::PATCH, uri, Some(Value::Object(body)))
            }
            EntityState::Deleted => {
                let uri = self.entity_uri(change, extra, &mut headers)?;
                (Method::DELETE, uri, None)
            }
            EntityState::Unchanged | EntityState::Detached => return Ok(None),
        };

        Ok(Some(ChangeRequest {
            method,
            uri,
            headers,
            body,
            origin,
        }))
    }

    /// Key-literal URI of an existing entity, cached in the side table.
    fn entity_uri(
        &self,
        change: &PendingChange,
        extra: &ExtraMetadataTable,
        headers: &mut HeaderMap,
    ) -> Result<String, ODataError> {
        let key = match extra.key_literal(change.id) {
            Some(key) => key,
            None => {
                let key = self.resolver.key_literal(&change.type_name, &change.values)?;
                extra.set_key_literal(change.id, key.clone());
                key
            }
        };

        if let Some(etag) = extra.etag(change.id) {
            let value = HeaderValue::from_str(&etag).map_err(|e| {
                ODataError::protocol(format!("invalid concurrency token '{etag}': {e}"))
            })?;
            headers.insert(header::IF_MATCH, value);
        }

        if key.contains("//") {
            Ok(key)
        } else {
            Ok(format!("{}{key}", self.route))
        }
    }

    /// Build a single query request.
    ///
    /// `$method` selects the verb (GET by default). GET appends the remaining
    /// parameters as a query string; any other verb sends `$data` (shaped
    /// after the target operation) or the remaining parameters as the body.
    ///
    /// # Errors
    /// Returns an error for an invalid `$method` or a payload that cannot be formatted.
    pub fn build_query_request(&self, query: &ODataQuery) -> Result<RequestDescriptor, ODataError> {
        let uri = self.absolute_url(&query.resource);

        let Some(parameters) = &query.parameters else {
            return Ok(RequestDescriptor {
                method: Method::GET,
                uri,
                body: None,
            });
        };

        let mut parameters = parameters.clone();
        let method = match parameters.remove(METHOD_PARAMETER) {
            Some(Value::String(verb)) => Method::from_bytes(verb.to_ascii_uppercase().as_bytes())
                .map_err(|e| ODataError::protocol(format!("invalid $method '{verb}': {e}")))?,
            Some(Value::Null) | None => Method::GET,
            Some(other) => {
                return Err(ODataError::protocol(format!("invalid $method {other}")));
            }
        };

        if method == Method::GET {
            return Ok(RequestDescriptor {
                method,
                uri: append_query_string(uri, &parameters),
                body: None,
            });
        }

        let body = match parameters.get(DATA_PARAMETER) {
            Some(data) => self.shape_data(&query.resource, data)?,
            None => Value::Object(parameters),
        };

        Ok(RequestDescriptor {
            method,
            uri,
            body: Some(body),
        })
    }

    fn shape_data(&self, resource: &str, data: &Value) -> Result<Value, ODataError> {
        if data.is_null() {
            return Ok(Value::Null);
        }

        if let Value::Object(map) = data {
            if !self.resolver.validate_property_names(map) {
                return Ok(data.clone());
            }
            if let Some(type_name) = map.get("@odata.type").and_then(Value::as_str) {
                let type_name = type_name.trim_start_matches('#');
                if let Some(ty) = self.resolver.edm_type(type_name) {
                    return Ok(Value::Object(self.resolver.to_wire(ty, map, None)?));
                }
            }
        }

        match self.invokables.resolve(resource) {
            Some(entry) => Ok(reshape_payload(entry, data, &self.resolver)?),
            None => Ok(data.clone()),
        }
    }
}

/// Resolve `url` against the service root.
///
/// URLs under the root or with an `http(s)://` scheme are kept as they are.
#[must_use]
pub fn absolute_url(root: &str, url: &str) -> String {
    if url.starts_with(root) || url.starts_with("https://") || url.starts_with("http://") {
        url.to_owned()
    } else {
        format!("{root}{url}")
    }
}

/// Append `parameters` as an encoded query string.
#[must_use]
pub fn append_query_string(url: String, parameters: &Map<String, Value>) -> String {
    if parameters.is_empty() {
        return url;
    }

    let query = parameters
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(&value))
        })
        .collect::<Vec<_>>()
        .join("&");

    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{query}")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use modkit_edm::MetadataCatalog;
    use serde_json::json;

    const ROUTE: &str = "https://svc.example.com/odata/";

    fn catalog() -> MetadataCatalog {
        serde_json::from_value(json!({
            "naming": "camelCase",
            "schemas": [{
                "namespace": "Demo",
                "entityTypes": [{
                    "name": "Customer",
                    "resourceName": "Customers",
                    "key": ["Id"],
                    "keyGeneration": "identity",
                    "properties": [
                        {"name": "Id", "type": "Edm.Int32"},
                        {"name": "Name", "type": "Edm.String"},
                        {"name": "Credit", "type": "Edm.Int64"},
                        {"name": "Selected", "type": "Edm.Boolean", "unmapped": true}
                    ]
                }],
                "complexTypes": [{
                    "name": "Address",
                    "properties": [{"name": "City", "type": "Edm.String"}]
                }],
                "actions": [{
                    "name": "Rate",
                    "isBound": true,
                    "parameters": [
                        {"name": "c", "type": "Demo.Customer"},
                        {"name": "customer", "type": "Demo.Customer"}
                    ]
                }],
                "functions": [{
                    "name": "GetTotal",
                    "parameters": [{"name": "year", "type": "Edm.Int32"}]
                }]
            }]
        }))
        .unwrap()
    }

    fn values(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn added_entity_posts_full_payload() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        let extra = ExtraMetadataTable::new();

        let change = PendingChange::added(
            "Customer",
            values(json!({"id": -1, "name": "Ann", "credit": 10, "selected": true})),
        );
        let req = builder.build_change_request(&change, &extra).unwrap().unwrap();

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.uri, "https://svc.example.com/odata/Customers");
        assert_eq!(req.body, Some(json!({"Id": -1, "Name": "Ann", "Credit": "10"})));
        assert_eq!(req.headers[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(req.origin.temp_key, Some(json!(-1)));
        assert!(extra.is_empty());
    }

    #[test]
    fn resource_name_override_applies_to_added() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        let change = PendingChange::added("Customer", values(json!({"id": -1})))
            .with_resource_name("VipCustomers");
        let req = builder
            .build_change_request(&change, &ExtraMetadataTable::new())
            .unwrap()
            .unwrap();
        assert_eq!(req.uri, "https://svc.example.com/odata/VipCustomers");
    }

    #[test]
    fn modified_entity_patches_changed_fields_with_if_match() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        let extra = ExtraMetadataTable::new();

        let change = PendingChange::modified(
            "Customer",
            values(json!({"id": 5, "name": "Bo", "credit": 1})),
            ["name"],
        );
        extra.set_etag(change.id, "W/\"7\"");

        let req = builder.build_change_request(&change, &extra).unwrap().unwrap();
        assert_eq!(req.method, Method::PATCH);
        assert_eq!(req.uri, "https://svc.example.com/odata/Customers(5)");
        assert_eq!(req.body, Some(json!({"Name": "Bo"})));
        assert_eq!(req.headers[header::IF_MATCH], "W/\"7\"");
        assert_eq!(extra.key_literal(change.id).as_deref(), Some("Customers(5)"));
    }

    #[test]
    fn cached_key_is_reused_and_absolute_keys_are_kept() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        let extra = ExtraMetadataTable::new();

        let change = PendingChange::deleted("Customer", values(json!({"id": 5})));
        extra.set_key_literal(change.id, "Customers(99)");
        let req = builder.build_change_request(&change, &extra).unwrap().unwrap();
        assert_eq!(req.method, Method::DELETE);
        assert_eq!(req.uri, "https://svc.example.com/odata/Customers(99)");
        assert!(req.body.is_none());
        assert!(req.headers.get(header::IF_MATCH).is_none());

        extra.set_key_literal(change.id, "https://other.example.com/odata/Customers(1)");
        let req = builder.build_change_request(&change, &extra).unwrap().unwrap();
        assert_eq!(req.uri, "https://other.example.com/odata/Customers(1)");
    }

    #[test]
    fn unchanged_and_detached_produce_nothing() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        for state in [EntityState::Unchanged, EntityState::Detached] {
            let change = PendingChange::new("Customer", state, Map::new());
            assert!(builder
                .build_change_request(&change, &ExtraMetadataTable::new())
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn get_query_appends_encoded_parameters() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);

        let query = ODataQuery::new("Customers?$top=5")
            .with_parameter("$method", json!("get"))
            .with_parameter("limit", json!(3))
            .with_parameter("region", json!("north east"));
        let req = builder.build_query_request(&query).unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(
            req.uri,
            "https://svc.example.com/odata/Customers?$top=5&limit=3&region=north%20east"
        );
        assert!(req.body.is_none());
    }

    #[test]
    fn absolute_query_url_is_not_prefixed_twice() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        let req = builder
            .build_query_request(&ODataQuery::new("https://svc.example.com/odata/Customers"))
            .unwrap();
        assert_eq!(req.uri, "https://svc.example.com/odata/Customers");
    }

    #[test]
    fn relative_urls_resolve_against_the_root() {
        assert_eq!(absolute_url(ROUTE, "$batch"), format!("{ROUTE}$batch"));
        assert_eq!(absolute_url(ROUTE, &format!("{ROUTE}$metadata")), format!("{ROUTE}$metadata"));
        assert_eq!(
            absolute_url(ROUTE, "http://other.example.com/meta"),
            "http://other.example.com/meta"
        );
    }

    #[test]
    fn post_query_shapes_data_after_operation_parameter() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);

        let query = ODataQuery::new("Customers(1)/Demo.Rate")
            .with_parameter("$method", json!("POST"))
            .with_parameter("$data", json!({"id": 1, "credit": 7, "selected": false}));
        let req = builder.build_query_request(&query).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.uri, "https://svc.example.com/odata/Customers(1)/Demo.Rate");
        assert_eq!(req.body, Some(json!({"Id": 1, "Credit": "7"})));
    }

    #[test]
    fn post_query_without_data_sends_remaining_parameters() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);

        let query = ODataQuery::new("GetTotal")
            .with_parameter("$method", json!("POST"))
            .with_parameter("year", json!(2024));
        let req = builder.build_query_request(&query).unwrap();
        assert_eq!(req.body, Some(json!({"year": 2024})));
    }

    #[test]
    fn data_shaping_passthrough_rules() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);

        // server-shaped names are left alone
        let raw = json!({"Credit": 7});
        assert_eq!(builder.shape_data("Customers(1)/Demo.Rate", &raw).unwrap(), raw);

        // primitive-only operation
        let raw = json!({"year": 2024});
        assert_eq!(builder.shape_data("GetTotal", &raw).unwrap(), raw);

        // no matching operation
        let raw = json!({"anything": 1});
        assert_eq!(builder.shape_data("Customers", &raw).unwrap(), raw);

        assert_eq!(builder.shape_data("Demo.Rate", &Value::Null).unwrap(), Value::Null);

        // explicit type annotation
        let typed = json!({"@odata.type": "#Demo.Address", "city": "Oslo"});
        assert_eq!(
            builder.shape_data("Customers", &typed).unwrap(),
            json!({"City": "Oslo"})
        );
    }

    #[test]
    fn invalid_method_is_rejected() {
        let c = catalog();
        let table = InvokableTable::build(&c);
        let builder = RequestBuilder::new(MetadataResolver::new(&c), &table, ROUTE);
        let query = ODataQuery::new("Customers").with_parameter("$method", json!("NOT A VERB"));
        assert!(builder.build_query_request(&query).is_err());
    }
}
