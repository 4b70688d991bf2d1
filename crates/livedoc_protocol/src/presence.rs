//! Presence payloads: where other collaborators are editing.

use crate::path::Path;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one client session on the transport.
///
/// Presence is keyed by session rather than user: the same user editing in
/// two tabs is two collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a collaborator broadcast about their own editing location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresencePayload {
    /// The sender is focused on a field.
    Focus {
        /// Focused path.
        path: Path,
    },
    /// The sender left the field they were focused on.
    Blur,
    /// The sender closed the document.
    Leave,
}

/// One presence broadcast, tagged with its sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    /// Sending session.
    pub session: SessionId,
    /// User behind the session.
    pub user: String,
    /// What they broadcast.
    pub payload: PresencePayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn payload_serde_shape() {
        let payload = PresencePayload::Focus {
            path: Path::keys(["fields", "title"]),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "focus");
        assert_eq!(json["path"], serde_json::json!(["fields", "title"]));
    }
}
