//! Snapshot shape normalization against the declared schema.

use crate::schema::{ContentTypeSchema, LocaleConfig};
use serde_json::{Map, Value};

/// Normalizes a snapshot's `fields` in place so every declared field is
/// present with the locale keys its declaration calls for.
///
/// - `fields` itself is created as an empty object when missing
/// - every declared field becomes an object, with `null` inserted for each
///   applicable locale that has no value yet
/// - locale keys outside the private set are pruned from declared fields
/// - undeclared fields are left untouched; pruning them could destroy data
///   the schema merely lags behind on
///
/// Runs locally at open time and produces no operation.
pub fn normalize(snapshot: &mut Value, schema: &ContentTypeSchema, locales: &LocaleConfig) {
    let Some(root) = snapshot.as_object_mut() else {
        return;
    };
    let slot = root
        .entry("fields")
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    let Some(fields) = slot.as_object_mut() else {
        return;
    };

    for field in &schema.fields {
        let slot = fields
            .entry(field.id.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Some(by_locale) = slot.as_object_mut() else {
            continue;
        };

        for locale in locales.locales_for(field) {
            by_locale
                .entry(locale.to_string())
                .or_insert(Value::Null);
        }
        by_locale.retain(|locale, _| locales.contains(locale));
    }
}
