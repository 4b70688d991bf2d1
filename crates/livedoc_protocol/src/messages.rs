//! Wire messages between a client and the collaboration server.
//!
//! Socket-level transports exchange these as CBOR frames via [`encode`] /
//! [`decode`]. In-process test transports speak the typed values directly.

use crate::error::{WireError, WireResult};
use crate::key::DocKey;
use crate::op::OtOp;
use crate::presence::{PresenceMessage, PresencePayload, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Locally generated id for one `open` request.
///
/// The loader compares this against its most recent request to discard
/// responses to superseded opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenRequestId(Uuid);

impl OpenRequestId {
    /// Generates a fresh request id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OpenRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Requests a document to be opened.
    Open {
        /// Request id echoed back in the completion.
        request: OpenRequestId,
        /// Document to open.
        key: DocKey,
    },
    /// Closes a previously opened document.
    Close {
        /// Document to close.
        key: DocKey,
    },
    /// Submits a local operation against a document version.
    Submit {
        /// Target document.
        key: DocKey,
        /// Version the op was produced against.
        version: u64,
        /// The operation.
        op: OtOp,
    },
    /// Broadcasts the sender's presence on a document.
    Presence {
        /// Target document.
        key: DocKey,
        /// Sending session.
        session: SessionId,
        /// User behind the session.
        user: String,
        /// The broadcast payload.
        payload: PresencePayload,
    },
    /// Replaces the connection's auth token.
    RefreshAuth {
        /// The new token.
        token: String,
    },
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A requested open succeeded.
    OpenOk {
        /// Echoed request id.
        request: OpenRequestId,
        /// Document key.
        key: DocKey,
        /// Full document snapshot.
        snapshot: Value,
        /// Server version of the snapshot.
        version: u64,
    },
    /// A requested open failed.
    OpenError {
        /// Echoed request id.
        request: OpenRequestId,
        /// Document key.
        key: DocKey,
        /// Failure description.
        message: String,
    },
    /// A close was acknowledged.
    Closed {
        /// Document key.
        key: DocKey,
    },
    /// A remote operation changed the document.
    Change {
        /// Document key.
        key: DocKey,
        /// Server version after the op.
        version: u64,
        /// The operation.
        op: OtOp,
    },
    /// A submitted local operation was acknowledged.
    Ack {
        /// Document key.
        key: DocKey,
        /// Server version after the op.
        version: u64,
    },
    /// A submitted operation was rejected (stale version).
    Rejected {
        /// Document key.
        key: DocKey,
        /// The version the server expected.
        expected_version: u64,
    },
    /// Another collaborator's presence broadcast.
    Presence {
        /// Document key.
        key: DocKey,
        /// The broadcast.
        message: PresenceMessage,
    },
    /// The auth refresh outcome.
    AuthRefreshed {
        /// Error description when the refresh failed.
        error: Option<String>,
    },
}

/// Encodes a wire message as a CBOR frame.
pub fn encode<T: Serialize>(message: &T) -> WireResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(message, &mut bytes).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a CBOR frame into a wire message.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> WireResult<T> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OtComponent;
    use crate::path::Path;
    use crate::EntityType;
    use serde_json::json;

    fn key() -> DocKey {
        DocKey::new("space1", "master", EntityType::Entry, "E1")
    }

    #[test]
    fn open_round_trip() {
        let message = ClientMessage::Open {
            request: OpenRequestId::generate(),
            key: key(),
        };
        let bytes = encode(&message).unwrap();
        let decoded: ClientMessage = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn change_round_trip() {
        let message = ServerMessage::Change {
            key: key(),
            version: 7,
            op: OtOp::single(OtComponent::Set {
                path: Path::keys(["fields", "title", "en-US"]),
                old: Some(json!("a")),
                new: json!("b"),
            }),
        };
        let bytes = encode(&message).unwrap();
        let decoded: ServerMessage = decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode::<ServerMessage>(&[0xff, 0x00, 0x13]).is_err());
    }
}
