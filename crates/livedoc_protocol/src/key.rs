//! Composite document addressing.

use crate::error::KeyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of entity behind a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A structured content entry.
    Entry,
    /// A media asset.
    Asset,
}

impl EntityType {
    /// The lowercased wire token (`entry` / `asset`).
    pub fn wire_token(&self) -> &'static str {
        match self {
            EntityType::Entry => "entry",
            EntityType::Asset => "asset",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_token())
    }
}

/// Addresses one document on the collaboration server.
///
/// Wire form: `"{space}!{environment}!{entry|asset}!{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey {
    /// Space the entity lives in.
    pub space: String,
    /// Environment within the space.
    pub environment: String,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub id: String,
}

impl DocKey {
    /// Creates a key from its parts.
    pub fn new(
        space: impl Into<String>,
        environment: impl Into<String>,
        entity_type: EntityType,
        id: impl Into<String>,
    ) -> Self {
        Self {
            space: space.into(),
            environment: environment.into(),
            entity_type,
            id: id.into(),
        }
    }

    /// The composite wire form.
    pub fn wire(&self) -> String {
        format!(
            "{}!{}!{}!{}",
            self.space,
            self.environment,
            self.entity_type.wire_token(),
            self.id
        )
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}

impl FromStr for DocKey {
    type Err = KeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.split('!').collect();
        let [space, environment, type_token, id] = parts[..] else {
            return Err(KeyError::Malformed {
                input: input.to_string(),
            });
        };
        if space.is_empty() || environment.is_empty() || id.is_empty() {
            return Err(KeyError::Malformed {
                input: input.to_string(),
            });
        }
        let entity_type = match type_token {
            "entry" => EntityType::Entry,
            "asset" => EntityType::Asset,
            other => {
                return Err(KeyError::UnknownEntityType {
                    token: other.to_string(),
                })
            }
        };
        Ok(DocKey::new(space, environment, entity_type, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form() {
        let key = DocKey::new("space1", "master", EntityType::Entry, "E1");
        assert_eq!(key.wire(), "space1!master!entry!E1");
    }

    #[test]
    fn round_trip() {
        let key = DocKey::new("s", "env", EntityType::Asset, "A9");
        let parsed: DocKey = key.wire().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            "a!b!entry".parse::<DocKey>(),
            Err(KeyError::Malformed { .. })
        ));
        assert!(matches!(
            "!b!entry!x".parse::<DocKey>(),
            Err(KeyError::Malformed { .. })
        ));
        assert!(matches!(
            "a!b!Entry!x".parse::<DocKey>(),
            Err(KeyError::UnknownEntityType { .. })
        ));
    }
}
