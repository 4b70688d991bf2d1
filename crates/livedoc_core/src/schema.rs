//! Content type and locale configuration consumed by normalization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One declared field of a content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field id; the key under `fields`.
    pub id: String,
    /// Whether the field stores a value per private locale.
    #[serde(default)]
    pub localized: bool,
    /// Disabled fields are still normalized; editors merely hide them.
    #[serde(default)]
    pub disabled: bool,
}

impl FieldDef {
    /// A non-localized, enabled field.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            localized: false,
            disabled: false,
        }
    }

    /// Marks the field as localized.
    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }
}

/// The declared shape of an entry's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeSchema {
    /// Content type id.
    pub id: String,
    /// Declared fields, in editor order.
    pub fields: Vec<FieldDef>,
}

impl ContentTypeSchema {
    /// Builds a schema from its fields.
    pub fn new(id: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Looks up a declared field by id.
    pub fn field(&self, id: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.id == id)
    }
}

/// The locales a space edits in.
///
/// `private_locales` is the full editable set; the default locale is always
/// a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleConfig {
    default_locale: String,
    private_locales: BTreeSet<String>,
}

impl LocaleConfig {
    /// Builds a locale configuration. The default locale is added to the
    /// private set when missing.
    pub fn new<I, S>(default_locale: impl Into<String>, private_locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let default_locale = default_locale.into();
        let mut private_locales: BTreeSet<String> =
            private_locales.into_iter().map(Into::into).collect();
        private_locales.insert(default_locale.clone());
        Self {
            default_locale,
            private_locales,
        }
    }

    /// A single-locale configuration.
    pub fn single(locale: impl Into<String>) -> Self {
        let locale = locale.into();
        Self::new(locale.clone(), [locale])
    }

    /// The default locale code.
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// All editable locale codes, sorted.
    pub fn private_locales(&self) -> impl Iterator<Item = &str> {
        self.private_locales.iter().map(String::as_str)
    }

    /// Whether `locale` is editable in this space.
    pub fn contains(&self, locale: &str) -> bool {
        self.private_locales.contains(locale)
    }

    /// The locales a field stores values for.
    pub fn locales_for(&self, field: &FieldDef) -> Vec<&str> {
        if field.localized {
            self.private_locales().collect()
        } else {
            vec![self.default_locale()]
        }
    }
}
