//! Ready-made entities, schemas and locale configurations.

use chrono::{TimeZone, Utc};
use livedoc_core::{
    ContentTypeSchema, Entity, EntityType, FieldDef, LocaleConfig, SharedEntity, Sys,
};
use serde_json::{json, Value};

/// Space used by all fixtures.
pub const TEST_SPACE: &str = "space1";

/// Environment used by all fixtures.
pub const TEST_ENVIRONMENT: &str = "master";

/// A two-locale configuration: `en-US` default plus `de-DE`.
pub fn two_locales() -> LocaleConfig {
    LocaleConfig::new("en-US", ["de-DE"])
}

/// A blog-post content type: localized title and tags, single-locale slug.
pub fn post_schema() -> ContentTypeSchema {
    ContentTypeSchema::new(
        "post",
        vec![
            FieldDef::new("title").localized(),
            FieldDef::new("slug"),
            FieldDef::new("tags").localized(),
        ],
    )
}

/// An entry that has never been published.
pub fn fresh_entry(id: &str) -> SharedEntity {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut sys = Sys::new(id, EntityType::Entry, now);
    sys.content_type = Some("post".to_string());
    SharedEntity::new(Entity::new(sys))
}

/// An entry published at version 1, currently at version 2 (clean).
pub fn published_entry(id: &str) -> SharedEntity {
    let entry = fresh_entry(id);
    entry.update(|entity| {
        entity.sys.version = 2;
        entity.sys.published_version = Some(1);
    });
    entry
}

/// The OT snapshot for an entity as the server would hold it.
pub fn snapshot_for(entity: &SharedEntity) -> Value {
    entity.read(|entity| {
        let mut sys = json!({
            "id": entity.sys.id,
            "type": "Entry",
            "version": entity.sys.version,
        });
        if let Some(published) = entity.sys.published_version {
            sys["publishedVersion"] = json!(published);
        }
        if let Some(archived) = entity.sys.archived_version {
            sys["archivedVersion"] = json!(archived);
        }
        json!({"sys": sys, "fields": entity.fields})
    })
}

/// Like [`snapshot_for`], but with the fields normalized against
/// [`post_schema`] and [`two_locales`], matching what clients produce after
/// their open-time normalization pass.
pub fn normalized_snapshot_for(entity: &SharedEntity) -> Value {
    let mut snapshot = snapshot_for(entity);
    livedoc_core::normalize(&mut snapshot, &post_schema(), &two_locales());
    snapshot
}
