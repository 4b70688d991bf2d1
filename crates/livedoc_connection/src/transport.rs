//! Transport abstraction and the scripted test transport.

use crate::config::AuthToken;
use crate::error::{TransportError, TransportResult};
use crate::state::ConnectionState;
use livedoc_protocol::{DocKey, OpenRequestId, OtOp, PresenceMessage};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;

/// The result of a successful open: the document as the server sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedDoc {
    /// Full snapshot, including its `sys` object.
    pub snapshot: Value,
    /// Server version of the snapshot.
    pub version: u64,
}

/// Events concerning one open document, delivered through the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum DocEvent {
    /// A remote operation changed the document.
    Change {
        /// Server version after the op.
        version: u64,
        /// The operation.
        op: OtOp,
    },
    /// A locally submitted operation was acknowledged.
    Acknowledge {
        /// Server version after the op.
        version: u64,
    },
    /// A locally submitted operation was rejected (stale version).
    Rejected {
        /// The version the server expected.
        expected_version: u64,
    },
    /// Another collaborator's presence broadcast.
    Presence(PresenceMessage),
}

/// Everything the transport reports back to the connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel status changed.
    Status(ConnectionState),
    /// A previously requested open completed.
    OpenCompleted {
        /// The request this completes.
        request: OpenRequestId,
        /// Document key.
        key: DocKey,
        /// Snapshot and version, or a failure description.
        result: Result<OpenedDoc, String>,
    },
    /// A close was acknowledged by the server.
    CloseCompleted {
        /// Document key.
        key: DocKey,
    },
    /// An event for one open document.
    Doc {
        /// Document key.
        key: DocKey,
        /// The event.
        event: DocEvent,
    },
    /// An auth refresh completed.
    AuthRefreshed {
        /// `Err` carries the failure description.
        result: Result<(), String>,
    },
}

/// Receives transport events; implemented by [`Connection`](crate::Connection).
pub trait TransportSink: Send + Sync {
    /// Delivers one transport event.
    fn on_transport_event(&self, event: TransportEvent);
}

/// The supplied OT transport, treated as a black box.
///
/// Requests are fire-and-forget at the call site; completions arrive as
/// [`TransportEvent`]s on the attached sink. Conflict resolution between
/// concurrent operations is the transport/server's concern, not the
/// caller's.
pub trait OtTransport: Send + Sync {
    /// Attaches the sink all events are delivered to.
    fn attach(&self, sink: Arc<dyn TransportSink>);

    /// Starts the channel. Status progress arrives as `Status` events.
    fn connect(&self) -> TransportResult<()>;

    /// Requests a document open; completion arrives as `OpenCompleted`.
    fn open(&self, request: OpenRequestId, key: &DocKey) -> TransportResult<()>;

    /// Requests a document close; acknowledgment arrives as `CloseCompleted`.
    fn close_doc(&self, key: &DocKey) -> TransportResult<()>;

    /// Submits a local operation produced against `version`.
    fn submit(&self, key: &DocKey, version: u64, op: &OtOp) -> TransportResult<()>;

    /// Broadcasts a presence message for an open document.
    fn send_presence(&self, key: &DocKey, message: &PresenceMessage) -> TransportResult<()>;

    /// Replaces the channel's auth token; outcome arrives as `AuthRefreshed`.
    fn refresh_auth(&self, token: &AuthToken) -> TransportResult<()>;

    /// Tears the channel down.
    fn disconnect(&self);
}

/// One recorded call against the scripted transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// `connect` was called.
    Connect,
    /// `open` was called.
    Open {
        /// Request id.
        request: OpenRequestId,
        /// Document key.
        key: DocKey,
    },
    /// `close_doc` was called.
    CloseDoc {
        /// Document key.
        key: DocKey,
    },
    /// `submit` was called.
    Submit {
        /// Document key.
        key: DocKey,
        /// Version the op was produced against.
        version: u64,
        /// The operation.
        op: OtOp,
    },
    /// `send_presence` was called.
    Presence {
        /// Document key.
        key: DocKey,
        /// The broadcast.
        message: PresenceMessage,
    },
    /// `refresh_auth` was called.
    RefreshAuth {
        /// The new token.
        token: String,
    },
    /// `disconnect` was called.
    Disconnect,
}

/// A deterministic transport for tests: records every call and lets the test
/// script completions and server events explicitly.
#[derive(Default)]
pub struct ScriptedTransport {
    sink: RwLock<Option<Arc<dyn TransportSink>>>,
    calls: Mutex<Vec<TransportCall>>,
    refuse_sends: Mutex<bool>,
}

impl ScriptedTransport {
    /// Creates a scripted transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Drains and returns the recorded calls.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// The open requests recorded so far, in order.
    pub fn open_requests(&self) -> Vec<(OpenRequestId, DocKey)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Open { request, key } => Some((*request, key.clone())),
                _ => None,
            })
            .collect()
    }

    /// The submit calls recorded so far, in order.
    pub fn submits(&self) -> Vec<(DocKey, u64, OtOp)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Submit { key, version, op } => {
                    Some((key.clone(), *version, op.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Makes every subsequent send-style call fail.
    pub fn refuse_sends(&self, refuse: bool) {
        *self.refuse_sends.lock() = refuse;
    }

    /// Delivers a raw event to the attached sink.
    pub fn emit(&self, event: TransportEvent) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.on_transport_event(event);
        }
    }

    /// Scripts a status transition.
    pub fn set_status(&self, state: ConnectionState) {
        self.emit(TransportEvent::Status(state));
    }

    /// Scripts a successful open completion.
    pub fn complete_open_ok(
        &self,
        request: OpenRequestId,
        key: DocKey,
        snapshot: Value,
        version: u64,
    ) {
        self.emit(TransportEvent::OpenCompleted {
            request,
            key,
            result: Ok(OpenedDoc { snapshot, version }),
        });
    }

    /// Scripts a failed open completion.
    pub fn complete_open_err(&self, request: OpenRequestId, key: DocKey, message: &str) {
        self.emit(TransportEvent::OpenCompleted {
            request,
            key,
            result: Err(message.to_string()),
        });
    }

    /// Scripts a close acknowledgment.
    pub fn complete_close(&self, key: DocKey) {
        self.emit(TransportEvent::CloseCompleted { key });
    }

    /// Scripts a document event.
    pub fn doc_event(&self, key: DocKey, event: DocEvent) {
        self.emit(TransportEvent::Doc { key, event });
    }

    /// Scripts an auth refresh completion.
    pub fn auth_refreshed(&self, result: Result<(), String>) {
        self.emit(TransportEvent::AuthRefreshed { result });
    }

    fn record(&self, call: TransportCall) -> TransportResult<()> {
        if *self.refuse_sends.lock() {
            return Err(TransportError::send("scripted refusal"));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

impl OtTransport for ScriptedTransport {
    fn attach(&self, sink: Arc<dyn TransportSink>) {
        *self.sink.write() = Some(sink);
    }

    fn connect(&self) -> TransportResult<()> {
        self.record(TransportCall::Connect)
    }

    fn open(&self, request: OpenRequestId, key: &DocKey) -> TransportResult<()> {
        self.record(TransportCall::Open {
            request,
            key: key.clone(),
        })
    }

    fn close_doc(&self, key: &DocKey) -> TransportResult<()> {
        self.record(TransportCall::CloseDoc { key: key.clone() })
    }

    fn submit(&self, key: &DocKey, version: u64, op: &OtOp) -> TransportResult<()> {
        self.record(TransportCall::Submit {
            key: key.clone(),
            version,
            op: op.clone(),
        })
    }

    fn send_presence(&self, key: &DocKey, message: &PresenceMessage) -> TransportResult<()> {
        self.record(TransportCall::Presence {
            key: key.clone(),
            message: message.clone(),
        })
    }

    fn refresh_auth(&self, token: &AuthToken) -> TransportResult<()> {
        self.record(TransportCall::RefreshAuth {
            token: token.as_str().to_string(),
        })
    }

    fn disconnect(&self) {
        let _ = self.record(TransportCall::Disconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_protocol::EntityType;

    #[test]
    fn records_calls_in_order() {
        let transport = ScriptedTransport::new();
        let key = DocKey::new("s", "e", EntityType::Entry, "E1");
        transport.connect().unwrap();
        let request = OpenRequestId::generate();
        transport.open(request, &key).unwrap();
        transport.close_doc(&key).unwrap();

        let calls = transport.take_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], TransportCall::Connect);
        assert_eq!(
            calls[1],
            TransportCall::Open {
                request,
                key: key.clone()
            }
        );
        assert_eq!(calls[2], TransportCall::CloseDoc { key });
    }

    #[test]
    fn refusal_fails_sends() {
        let transport = ScriptedTransport::new();
        transport.refuse_sends(true);
        assert!(transport.connect().is_err());
        assert!(transport.calls().is_empty());
    }
}
