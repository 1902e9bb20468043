//! Pending entity changes and the per-entity wire metadata side table.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Client-side identity of a tracked entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    Added,
    Modified,
    Deleted,
    Unchanged,
    Detached,
}

impl EntityState {
    /// Whether a change in this state produces a request.
    #[must_use]
    pub fn is_save_worthy(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

/// One entity's pending change as handed over by the change tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingChange {
    pub id: EntityId,
    pub type_name: String,
    pub state: EntityState,
    /// Current values under client property names.
    pub values: Map<String, Value>,
    /// Client names of the changed properties (Modified only).
    pub changed: Vec<String>,
    /// Overrides the entity type's default resource name.
    pub resource_name: Option<String>,
}

impl PendingChange {
    #[must_use]
    pub fn new(
        type_name: impl Into<String>,
        state: EntityState,
        values: Map<String, Value>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            type_name: type_name.into(),
            state,
            values,
            changed: Vec::new(),
            resource_name: None,
        }
    }

    #[must_use]
    pub fn added(type_name: impl Into<String>, values: Map<String, Value>) -> Self {
        Self::new(type_name, EntityState::Added, values)
    }

    #[must_use]
    pub fn modified(
        type_name: impl Into<String>,
        values: Map<String, Value>,
        changed: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            changed: changed.into_iter().map(Into::into).collect(),
            ..Self::new(type_name, EntityState::Modified, values)
        }
    }

    #[must_use]
    pub fn deleted(type_name: impl Into<String>, values: Map<String, Value>) -> Self {
        Self::new(type_name, EntityState::Deleted, values)
    }

    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }
}

/// Wire metadata cached per entity between saves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtraMetadata {
    /// Key segment such as `Orders(42)`, or an absolute entity URL.
    pub key_literal: Option<String>,
    /// Concurrency token sent as `If-Match`.
    pub etag: Option<String>,
}

/// Side table of [`ExtraMetadata`] keyed by entity identity.
#[derive(Debug, Default)]
pub struct ExtraMetadataTable {
    entries: DashMap<EntityId, ExtraMetadata>,
}

impl ExtraMetadataTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<ExtraMetadata> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn key_literal(&self, id: EntityId) -> Option<String> {
        self.entries.get(&id).and_then(|e| e.key_literal.clone())
    }

    #[must_use]
    pub fn etag(&self, id: EntityId) -> Option<String> {
        self.entries.get(&id).and_then(|e| e.etag.clone())
    }

    pub fn set_key_literal(&self, id: EntityId, key_literal: impl Into<String>) {
        self.entries.entry(id).or_default().key_literal = Some(key_literal.into());
    }

    pub fn set_etag(&self, id: EntityId, etag: impl Into<String>) {
        self.entries.entry(id).or_default().etag = Some(etag.into());
    }

    pub fn remove(&self, id: EntityId) -> Option<ExtraMetadata> {
        self.entries.remove(&id).map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
