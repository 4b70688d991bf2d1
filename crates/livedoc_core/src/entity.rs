//! The externally owned content record and its metadata.

use chrono::{DateTime, Utc};
use livedoc_protocol::{EntityType, Path, Segment};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Entity metadata: id, type, version, timestamps, publish state.
///
/// Serializes to/from the `"sys"` object of an OT snapshot (camelCase keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sys {
    /// Entity id.
    pub id: String,
    /// Entity type.
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Server version; strictly increasing per observation.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Version that was last published, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_version: Option<u64>,
    /// Version that was archived, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_version: Option<u64>,
    /// User that created the entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Content type of the entity, for entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Sys {
    /// Creates minimal metadata for a new, never-published entity.
    pub fn new(id: impl Into<String>, entity_type: EntityType, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            entity_type,
            version: 1,
            created_at: now,
            updated_at: now,
            published_version: None,
            archived_version: None,
            created_by: None,
            content_type: None,
        }
    }

    /// An entity is dirty iff it was never published, or has changed since
    /// the last publish (`version > published_version + 1`; the publish
    /// itself bumps the version by one).
    pub fn is_dirty(&self) -> bool {
        match self.published_version {
            None => true,
            Some(published) => self.version > published + 1,
        }
    }

    /// Returns true when the entity is archived.
    pub fn is_archived(&self) -> bool {
        self.archived_version.is_some()
    }
}

/// A content record: metadata plus structured field data.
///
/// Owned externally; the document layer reads and patches it in place but
/// never creates or destroys it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Metadata.
    pub sys: Sys,
    /// Field data, shaped `fields[field][locale]`.
    pub fields: Value,
}

impl Entity {
    /// Creates an entity with empty fields.
    pub fn new(sys: Sys) -> Self {
        Self {
            sys,
            fields: Value::Object(serde_json::Map::new()),
        }
    }

    /// A deep copy of the value at `path` over the `{sys, fields}` view,
    /// or `None` when absent.
    pub fn value_at(&self, path: &Path) -> Option<Value> {
        let segments = path.segments();
        match segments.first() {
            None => Some(serde_json::json!({"sys": self.sys, "fields": self.fields})),
            Some(Segment::Key(key)) if key == "fields" => {
                lookup(&self.fields, &segments[1..]).cloned()
            }
            Some(Segment::Key(key)) if key == "sys" => {
                let sys = serde_json::to_value(&self.sys).ok()?;
                lookup(&sys, &segments[1..]).cloned()
            }
            Some(_) => None,
        }
    }
}

fn lookup<'a>(mut current: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key)?,
            (Value::Array(items), Segment::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// A handle to one externally owned entity, shared between the owner and
/// the document layer.
#[derive(Clone)]
pub struct SharedEntity(Arc<RwLock<Entity>>);

impl SharedEntity {
    /// Wraps an entity for sharing.
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// A clone of the current metadata.
    pub fn sys(&self) -> Sys {
        self.0.read().sys.clone()
    }

    /// A deep copy of the current field data.
    pub fn fields(&self) -> Value {
        self.0.read().fields.clone()
    }

    /// Reads through the entity.
    pub fn read<R>(&self, f: impl FnOnce(&Entity) -> R) -> R {
        f(&self.0.read())
    }

    /// Patches the entity in place.
    pub fn update(&self, f: impl FnOnce(&mut Entity)) {
        f(&mut self.0.write());
    }
}

impl std::fmt::Debug for SharedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entity = self.0.read();
        f.debug_struct("SharedEntity")
            .field("id", &entity.sys.id)
            .field("version", &entity.sys.version)
            .finish()
    }
}
