//! Change-set assembly and positional response correlation.

use http::header::{ETAG, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use modkit_edm::{KeyGeneration, MetadataResolver};
use serde_json::{Map, Value};

use crate::entity::{EntityId, EntityState, ExtraMetadataTable};
use crate::error::ODataError;
use crate::normalize::{Failure, normalize};
use crate::request::ChangeRequest;

/// `Content-ID` header of a change-set part.
pub const CONTENT_ID: HeaderName = HeaderName::from_static("content-id");

/// Ordered change requests numbered `1..=N`.
#[derive(Clone, Debug, Default)]
pub struct BatchEnvelope {
    requests: Vec<ChangeRequest>,
}

impl BatchEnvelope {
    #[must_use]
    pub fn requests(&self) -> &[ChangeRequest] {
        &self.requests
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Number the requests `1..=N` in order and set their `Content-ID` headers.
#[must_use]
pub fn assemble(requests: Vec<ChangeRequest>) -> BatchEnvelope {
    let requests = requests
        .into_iter()
        .zip(1_usize..)
        .map(|(mut request, id)| {
            request.headers.insert(CONTENT_ID, HeaderValue::from(id));
            request
        })
        .collect();
    BatchEnvelope { requests }
}

/// One decoded part of a batch response.
#[derive(Clone, Debug, Default)]
pub struct PartResponse {
    pub status: Option<StatusCode>,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PartResponse {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_none_or(|s| s.as_u16() >= 400)
    }
}

/// A server-generated key replacing a temporary client key.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyMapping {
    pub entity_type_name: String,
    pub temp_value: Value,
    pub real_value: Value,
}

/// An entity as it stands after the save.
#[derive(Clone, Debug, PartialEq)]
pub struct SavedEntity {
    pub entity: EntityId,
    pub type_name: String,
    /// Server payload when the part had one, original client values otherwise.
    pub data: Map<String, Value>,
    pub from_server: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaveResult {
    pub entities: Vec<SavedEntity>,
    pub key_mappings: Vec<KeyMapping>,
}

/// Correlate response parts with the envelope by position.
///
/// The first failing part fails the whole save; no key mappings are returned
/// and no cached concurrency token changes in that case. Otherwise the ETags
/// of successful parts replace the cached ones.
///
/// # Errors
/// Returns a protocol error for a failing, missing or extra part.
pub fn disassemble(
    envelope: &BatchEnvelope,
    parts: &[PartResponse],
    resolver: &MetadataResolver<'_>,
    extra: &ExtraMetadataTable,
    url: &str,
) -> Result<SaveResult, ODataError> {
    let mut result = SaveResult::default();
    let mut etags = Vec::new();

    for (index, request) in envelope.requests.iter().enumerate() {
        let content_id = index + 1;
        let Some(part) = parts.get(index) else {
            return Err(ODataError::protocol(format!(
                "batch response has no part for Content-ID {content_id} ({} of {} received)",
                parts.len(),
                envelope.len()
            ))
            .with_url(url));
        };

        if part.is_failure() {
            tracing::warn!(
                content_id,
                status = ?part.status,
                url = %url,
                "Batch part failed"
            );
            return Err(normalize(
                Failure::Response {
                    status: part.status,
                    status_text: &part.status_text,
                    body: &part.body,
                },
                url,
            ));
        }

        let origin = &request.origin;
        let payload = part_payload(part, content_id);

        if let Some(etag) = part.headers.get(ETAG).and_then(|v| v.to_str().ok()) {
            etags.push((origin.entity, etag.to_owned()));
        }

        match payload {
            Some(raw) => {
                if origin.state == EntityState::Added
                    && let Some(temp_value) = &origin.temp_key
                {
                    result
                        .key_mappings
                        .extend(key_mapping(resolver, &origin.type_name, temp_value, &raw));
                }
                result.entities.push(SavedEntity {
                    entity: origin.entity,
                    type_name: origin.type_name.clone(),
                    data: raw,
                    from_server: true,
                });
            }
            None => result.entities.push(SavedEntity {
                entity: origin.entity,
                type_name: origin.type_name.clone(),
                data: origin.values.clone(),
                from_server: false,
            }),
        }
    }

    if parts.len() > envelope.len() {
        return Err(ODataError::protocol(format!(
            "batch response has {} parts for {} requests",
            parts.len(),
            envelope.len()
        ))
        .with_url(url));
    }

    for (entity, etag) in etags {
        extra.set_etag(entity, etag);
    }

    tracing::debug!(
        parts = parts.len(),
        key_mappings = result.key_mappings.len(),
        "Batch response correlated"
    );
    Ok(result)
}

/// Server key for an added entity whose type has a generated key.
///
/// The change set is already committed, so a payload without a usable key
/// only loses the mapping.
fn key_mapping(
    resolver: &MetadataResolver<'_>,
    type_name: &str,
    temp_value: &Value,
    raw: &Map<String, Value>,
) -> Option<KeyMapping> {
    let ty = match resolver.entity_type(type_name) {
        Ok(ty) => ty,
        Err(e) => {
            tracing::warn!(type_name, error = %e, "No key mapping for saved entity");
            return None;
        }
    };
    if ty.def.key_generation == KeyGeneration::None {
        return None;
    }
    match resolver.extract_key(type_name, raw) {
        Ok(values) => Some(KeyMapping {
            entity_type_name: ty.qualified_name(),
            temp_value: temp_value.clone(),
            real_value: values.into_iter().next().unwrap_or(Value::Null),
        }),
        Err(e) => {
            tracing::warn!(type_name, error = %e, "Server payload has no usable key");
            None
        }
    }
}

/// JSON object body of a successful part, if any.
fn part_payload(part: &PartResponse, content_id: usize) -> Option<Map<String, Value>> {
    if part.body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<Value>(&part.body) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(content_id, error = %e, "Ignoring unreadable batch part body");
            None
        }
    }
}
