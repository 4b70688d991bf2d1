//! One live OT document.

use crate::error::{SubmitError, SubmitResult};
use crate::transport::{DocEvent, OtTransport};
use livedoc_protocol::{apply_op, DocKey, OtComponent, OtOp, Path, PresenceMessage, Segment};
use livedoc_reactive::EventFeed;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Events emitted on an [`OtDoc`]'s feed.
#[derive(Debug, Clone)]
pub enum OtDocEvent {
    /// The document changed; `remote` distinguishes server ops from local
    /// optimistic application.
    Change {
        /// Components that were applied.
        components: Vec<OtComponent>,
        /// True when the change came from the server.
        remote: bool,
    },
    /// The server acknowledged a local op.
    Acknowledged {
        /// Server version after the op.
        version: u64,
    },
    /// The server rejected a local op.
    Rejected {
        /// The version the server expected.
        expected_version: u64,
    },
    /// A collaborator presence broadcast arrived.
    Presence(PresenceMessage),
    /// The document was closed.
    Closed,
}

struct DocInner {
    snapshot: Value,
    version: u64,
    inflight: Option<OtOp>,
    pending: Option<OtOp>,
    closed: bool,
}

/// The live object representing one open OT document.
///
/// Owned exclusively by the loader that opened it. Local submissions apply
/// optimistically to the snapshot and queue behind at most one in-flight op;
/// `inflight_op` / `pending_op` expose the unacknowledged local state.
///
/// The feed replaces event-emitter interception: owners subscribe once when
/// the document opens and drop the subscription when it closes.
pub struct OtDoc {
    key: DocKey,
    transport: Arc<dyn OtTransport>,
    inner: RwLock<DocInner>,
    events: EventFeed<OtDocEvent>,
}

impl OtDoc {
    /// Wraps a freshly opened document.
    pub fn new(key: DocKey, transport: Arc<dyn OtTransport>, snapshot: Value, version: u64) -> Self {
        Self {
            key,
            transport,
            inner: RwLock::new(DocInner {
                snapshot,
                version,
                inflight: None,
                pending: None,
                closed: false,
            }),
            events: EventFeed::new(),
        }
    }

    /// The document's key.
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// The document's event feed.
    pub fn events(&self) -> &EventFeed<OtDocEvent> {
        &self.events
    }

    /// A deep copy of the current snapshot.
    pub fn snapshot(&self) -> Value {
        self.inner.read().snapshot.clone()
    }

    /// The current version.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// The op awaiting server acknowledgment, if any.
    pub fn inflight_op(&self) -> Option<OtOp> {
        self.inner.read().inflight.clone()
    }

    /// The op queued behind the in-flight one, if any.
    pub fn pending_op(&self) -> Option<OtOp> {
        self.inner.read().pending.clone()
    }

    /// True while any local op is unacknowledged.
    pub fn has_unacknowledged(&self) -> bool {
        let inner = self.inner.read();
        inner.inflight.is_some() || inner.pending.is_some()
    }

    /// True once the document has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// A deep copy of the value at `path`, or `None` when absent.
    pub fn value_at(&self, path: &Path) -> Option<Value> {
        let inner = self.inner.read();
        let mut current = &inner.snapshot;
        for segment in path.segments() {
            current = match (current, segment) {
                (Value::Object(map), Segment::Key(key)) => map.get(key)?,
                (Value::Array(items), Segment::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Applies a local shape fixup to the snapshot without producing an op.
    ///
    /// Used for schema normalization at open time; never submitted.
    pub fn patch_snapshot(&self, f: impl FnOnce(&mut Value)) {
        f(&mut self.inner.write().snapshot);
    }

    /// Submits a local operation.
    ///
    /// The op is applied to the local snapshot immediately (read your own
    /// writes) and sent to the server, queuing behind an in-flight op when
    /// one exists. A transport send failure keeps the op as unacknowledged
    /// local state so it is reapplied after a reconnect.
    pub fn submit_op(&self, op: OtOp) -> SubmitResult<()> {
        let send_at = {
            let mut inner = self.inner.write();
            if inner.closed {
                return Err(SubmitError::DocClosed);
            }
            apply_op(&mut inner.snapshot, &op)?;
            if inner.inflight.is_none() {
                inner.inflight = Some(op.clone());
                Some(inner.version)
            } else {
                inner.pending = Some(match inner.pending.take() {
                    Some(queued) => queued.compose(op.clone()),
                    None => op.clone(),
                });
                None
            }
        };

        if let Some(version) = send_at {
            if let Err(e) = self.transport.submit(&self.key, version, &op) {
                warn!(key = %self.key, error = %e, "submit not sent; op held for reapply");
            }
        }

        self.events.emit(OtDocEvent::Change {
            components: op.components().to_vec(),
            remote: false,
        });
        Ok(())
    }

    /// Inserts `value` at `index` into the list at `path`.
    pub fn insert_at(&self, path: &Path, index: usize, value: Value) -> SubmitResult<()> {
        self.submit_op(OtOp::single(OtComponent::ListInsert {
            path: path.join(index),
            value,
        }))
    }

    /// Moves the element at `from` in the list at `path` to `to`.
    pub fn move_at(&self, path: &Path, from: usize, to: usize) -> SubmitResult<()> {
        self.submit_op(OtOp::single(OtComponent::ListMove {
            path: path.join(from),
            to,
        }))
    }

    /// Handles one server event for this document.
    pub(crate) fn handle(&self, event: DocEvent) {
        match event {
            DocEvent::Change { version, op } => {
                {
                    let mut inner = self.inner.write();
                    if inner.closed {
                        return;
                    }
                    if let Err(e) = apply_op(&mut inner.snapshot, &op) {
                        panic!(
                            "remote op for {} does not apply to the local snapshot: {e}",
                            self.key
                        );
                    }
                    inner.version = version;
                }
                self.events.emit(OtDocEvent::Change {
                    components: op.components().to_vec(),
                    remote: true,
                });
            }
            DocEvent::Acknowledge { version } => {
                let resend = {
                    let mut inner = self.inner.write();
                    if inner.closed {
                        return;
                    }
                    if version > inner.version {
                        inner.version = version;
                    } else {
                        debug!(
                            key = %self.key,
                            version,
                            current = inner.version,
                            "out-of-order acknowledge; version not regressed"
                        );
                    }
                    inner.inflight = None;
                    if let Some(promoted) = inner.pending.take() {
                        inner.inflight = Some(promoted.clone());
                        Some((inner.version, promoted))
                    } else {
                        None
                    }
                };
                if let Some((at, op)) = resend {
                    if let Err(e) = self.transport.submit(&self.key, at, &op) {
                        warn!(key = %self.key, error = %e, "promoted op not sent; held for reapply");
                    }
                }
                self.events.emit(OtDocEvent::Acknowledged { version });
            }
            DocEvent::Rejected { expected_version } => {
                warn!(
                    key = %self.key,
                    expected_version,
                    "server rejected local op; it stays unacknowledged"
                );
                self.events.emit(OtDocEvent::Rejected { expected_version });
            }
            DocEvent::Presence(message) => {
                self.events.emit(OtDocEvent::Presence(message));
            }
        }
    }

    /// Takes the unacknowledged local ops for reapplication, pending first.
    pub(crate) fn take_unacknowledged(&self) -> Vec<OtOp> {
        let mut inner = self.inner.write();
        let mut ops = Vec::new();
        if let Some(pending) = inner.pending.take() {
            ops.push(pending);
        }
        if let Some(inflight) = inner.inflight.take() {
            ops.push(inflight);
        }
        ops
    }

    /// Broadcasts a presence message for this document.
    ///
    /// Not gated on the closed flag: the `Closed` feed event fires before
    /// the wire close goes out, so listeners may still broadcast a final
    /// departure.
    pub fn send_presence(&self, message: &PresenceMessage) -> SubmitResult<()> {
        self.transport.send_presence(&self.key, message)?;
        Ok(())
    }

    /// Closes the document.
    ///
    /// Emits `Closed` on the feed first (final presence broadcasts go out
    /// here), then sends the wire close best-effort: an already-closed
    /// transport error is swallowed. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.write();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.events.emit(OtDocEvent::Closed);
        if let Err(e) = self.transport.close_doc(&self.key) {
            debug!(key = %self.key, error = %e, "close not sent");
        }
    }
}

impl std::fmt::Debug for OtDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("OtDoc")
            .field("key", &self.key)
            .field("version", &inner.version)
            .field("inflight", &inner.inflight.is_some())
            .field("pending", &inner.pending.is_some())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedTransport, TransportCall};
    use livedoc_protocol::EntityType;
    use serde_json::json;

    fn fixture() -> (Arc<ScriptedTransport>, OtDoc) {
        let transport = ScriptedTransport::new();
        let key = DocKey::new("s", "e", EntityType::Entry, "E1");
        let snapshot = json!({
            "sys": {"id": "E1", "version": 1},
            "fields": {"title": {"en-US": "hello"}}
        });
        let doc = OtDoc::new(key, transport.clone(), snapshot, 1);
        (transport, doc)
    }

    fn set_title(value: &str, old: &str) -> OtOp {
        OtOp::single(OtComponent::Set {
            path: Path::keys(["fields", "title", "en-US"]),
            old: Some(json!(old)),
            new: json!(value),
        })
    }

    #[test]
    fn submit_applies_locally_and_sends() {
        let (transport, doc) = fixture();
        doc.submit_op(set_title("world", "hello")).unwrap();

        assert_eq!(
            doc.value_at(&Path::keys(["fields", "title", "en-US"])),
            Some(json!("world"))
        );
        assert!(doc.has_unacknowledged());
        let submits = transport.submits();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].1, 1);
    }

    #[test]
    fn second_submit_queues_behind_inflight() {
        let (transport, doc) = fixture();
        doc.submit_op(set_title("a", "hello")).unwrap();
        doc.submit_op(set_title("b", "a")).unwrap();

        assert!(doc.inflight_op().is_some());
        assert!(doc.pending_op().is_some());
        // Only the first op went to the wire.
        assert_eq!(transport.submits().len(), 1);
    }

    #[test]
    fn acknowledge_promotes_pending() {
        let (transport, doc) = fixture();
        doc.submit_op(set_title("a", "hello")).unwrap();
        doc.submit_op(set_title("b", "a")).unwrap();

        doc.handle(DocEvent::Acknowledge { version: 2 });
        assert_eq!(doc.version(), 2);
        assert!(doc.pending_op().is_none());
        assert!(doc.inflight_op().is_some());

        let submits = transport.submits();
        assert_eq!(submits.len(), 2);
        assert_eq!(submits[1].1, 2);

        doc.handle(DocEvent::Acknowledge { version: 3 });
        assert!(!doc.has_unacknowledged());
    }

    #[test]
    fn out_of_order_acknowledge_does_not_regress_version() {
        let (_transport, doc) = fixture();
        doc.submit_op(set_title("a", "hello")).unwrap();
        doc.handle(DocEvent::Acknowledge { version: 5 });
        doc.handle(DocEvent::Acknowledge { version: 3 });
        assert_eq!(doc.version(), 5);
    }

    #[test]
    fn remote_change_applies_and_bumps_version() {
        let (_transport, doc) = fixture();
        doc.handle(DocEvent::Change {
            version: 2,
            op: set_title("remote", "hello"),
        });
        assert_eq!(doc.version(), 2);
        assert_eq!(
            doc.value_at(&Path::keys(["fields", "title", "en-US"])),
            Some(json!("remote"))
        );
    }

    #[test]
    fn take_unacknowledged_orders_pending_first() {
        let (_transport, doc) = fixture();
        let b = set_title("b", "hello");
        let a = set_title("a", "b");
        doc.submit_op(b.clone()).unwrap(); // becomes inflight
        doc.submit_op(a.clone()).unwrap(); // becomes pending

        let ops = doc.take_unacknowledged();
        assert_eq!(ops, vec![a, b]);
        assert!(!doc.has_unacknowledged());
    }

    #[test]
    fn close_is_idempotent_and_refuses_submits() {
        let (transport, doc) = fixture();
        doc.close();
        doc.close();
        let closes = transport
            .calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::CloseDoc { .. }))
            .count();
        assert_eq!(closes, 1);
        assert_eq!(
            doc.submit_op(set_title("x", "hello")).unwrap_err(),
            SubmitError::DocClosed
        );
    }

    #[test]
    fn list_helpers_apply_locally() {
        let (_transport, doc) = fixture();
        let tags = Path::keys(["fields", "tags"]);
        doc.submit_op(OtOp::single(OtComponent::Set {
            path: tags.clone(),
            old: None,
            new: json!(["a", "c"]),
        }))
        .unwrap();

        doc.insert_at(&tags, 1, json!("b")).unwrap();
        doc.move_at(&tags, 2, 0).unwrap();
        assert_eq!(doc.value_at(&tags), Some(json!(["c", "a", "b"])));
    }

    #[test]
    fn value_at_missing_path_is_none() {
        let (_transport, doc) = fixture();
        assert_eq!(doc.value_at(&Path::keys(["fields", "nope"])), None);
    }
}
