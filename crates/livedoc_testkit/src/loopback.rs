//! An in-memory collaboration server with synchronous delivery.
//!
//! Client and server exchange real CBOR frames through the protocol codec,
//! so end-to-end tests exercise the same message shapes a socket transport
//! would. Delivery is synchronous: by the time a transport call returns,
//! every resulting event has been handled.

use livedoc_connection::{
    ConnectionState, DocEvent, OpenedDoc, OtTransport, TransportEvent, TransportResult,
    TransportSink,
};
use livedoc_connection::{AuthToken, TransportError};
use livedoc_protocol::{
    apply_op, decode, encode, ClientMessage, DocKey, OpenRequestId, OtOp, PresenceMessage,
    ServerMessage,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

struct ServerDoc {
    snapshot: Value,
    version: u64,
    subscribers: HashSet<u64>,
}

struct ServerInner {
    docs: HashMap<DocKey, ServerDoc>,
    clients: HashMap<u64, Weak<LoopbackTransport>>,
    revoked_tokens: HashSet<String>,
    next_client_id: u64,
}

/// The in-memory collaboration server.
///
/// Holds the authoritative snapshot and version per document, fans changes
/// out to subscribers, and rejects submissions against a stale version.
pub struct LoopbackServer {
    inner: Mutex<ServerInner>,
}

impl LoopbackServer {
    /// Creates an empty server.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ServerInner {
                docs: HashMap::new(),
                clients: HashMap::new(),
                revoked_tokens: HashSet::new(),
                next_client_id: 1,
            }),
        })
    }

    /// Creates a document on the server. Opens for unknown keys fail.
    pub fn seed_doc(&self, key: DocKey, snapshot: Value, version: u64) {
        self.inner.lock().docs.insert(
            key,
            ServerDoc {
                snapshot,
                version,
                subscribers: HashSet::new(),
            },
        );
    }

    /// Creates a transport bound to this server.
    pub fn client(self: &Arc<Self>) -> Arc<LoopbackTransport> {
        let mut inner = self.inner.lock();
        let id = inner.next_client_id;
        inner.next_client_id += 1;
        let transport = Arc::new(LoopbackTransport {
            id,
            server: Arc::clone(self),
            sink: RwLock::new(None),
            connected: Mutex::new(false),
        });
        inner.clients.insert(id, Arc::downgrade(&transport));
        transport
    }

    /// Marks a token as revoked; refreshing to it fails.
    pub fn revoke_token(&self, token: &str) {
        self.inner.lock().revoked_tokens.insert(token.to_string());
    }

    /// The server's snapshot of a document.
    pub fn doc_snapshot(&self, key: &DocKey) -> Option<Value> {
        self.inner.lock().docs.get(key).map(|doc| doc.snapshot.clone())
    }

    /// The server's version of a document.
    pub fn doc_version(&self, key: &DocKey) -> Option<u64> {
        self.inner.lock().docs.get(key).map(|doc| doc.version)
    }

    /// Subscriber count for a document.
    pub fn subscriber_count(&self, key: &DocKey) -> usize {
        self.inner
            .lock()
            .docs
            .get(key)
            .map_or(0, |doc| doc.subscribers.len())
    }

    fn handle_frame(&self, from: u64, frame: &[u8]) -> TransportResult<()> {
        let message: ClientMessage =
            decode(frame).map_err(|e| TransportError::send(e.to_string()))?;
        trace!(client = from, ?message, "loopback server received");

        let deliveries = {
            let mut inner = self.inner.lock();
            self.process(&mut inner, from, message)
        };
        for (target, reply) in deliveries {
            target.deliver(reply);
        }
        Ok(())
    }

    /// Processes one client message under the lock and returns the replies
    /// to deliver after it is released; delivery re-enters the server when a
    /// reply triggers a follow-up submit.
    fn process(
        &self,
        inner: &mut ServerInner,
        from: u64,
        message: ClientMessage,
    ) -> Vec<(Arc<LoopbackTransport>, ServerMessage)> {
        let mut replies = Vec::new();
        let mut reply_to = |inner: &ServerInner,
                            replies: &mut Vec<(Arc<LoopbackTransport>, ServerMessage)>,
                            client: u64,
                            message: ServerMessage| {
            if let Some(target) = inner.clients.get(&client).and_then(Weak::upgrade) {
                replies.push((target, message));
            }
        };

        match message {
            ClientMessage::Open { request, key } => match inner.docs.get_mut(&key) {
                Some(doc) => {
                    doc.subscribers.insert(from);
                    let reply = ServerMessage::OpenOk {
                        request,
                        key,
                        snapshot: doc.snapshot.clone(),
                        version: doc.version,
                    };
                    reply_to(inner, &mut replies, from, reply);
                }
                None => {
                    reply_to(
                        inner,
                        &mut replies,
                        from,
                        ServerMessage::OpenError {
                            request,
                            key,
                            message: "unknown document".to_string(),
                        },
                    );
                }
            },
            ClientMessage::Close { key } => {
                if let Some(doc) = inner.docs.get_mut(&key) {
                    doc.subscribers.remove(&from);
                }
                reply_to(inner, &mut replies, from, ServerMessage::Closed { key });
            }
            ClientMessage::Submit { key, version, op } => {
                self.process_submit(inner, from, key, version, op, &mut replies, &mut reply_to);
            }
            ClientMessage::Presence {
                key,
                session,
                user,
                payload,
            } => {
                let subscribers: Vec<u64> = inner
                    .docs
                    .get(&key)
                    .map(|doc| doc.subscribers.iter().copied().collect())
                    .unwrap_or_default();
                let broadcast = PresenceMessage {
                    session,
                    user,
                    payload,
                };
                for subscriber in subscribers {
                    reply_to(
                        inner,
                        &mut replies,
                        subscriber,
                        ServerMessage::Presence {
                            key: key.clone(),
                            message: broadcast.clone(),
                        },
                    );
                }
            }
            ClientMessage::RefreshAuth { token } => {
                let error = inner
                    .revoked_tokens
                    .contains(&token)
                    .then(|| "token revoked".to_string());
                reply_to(
                    inner,
                    &mut replies,
                    from,
                    ServerMessage::AuthRefreshed { error },
                );
            }
        }
        replies
    }

    #[allow(clippy::too_many_arguments)]
    fn process_submit(
        &self,
        inner: &mut ServerInner,
        from: u64,
        key: DocKey,
        version: u64,
        op: OtOp,
        replies: &mut Vec<(Arc<LoopbackTransport>, ServerMessage)>,
        reply_to: &mut impl FnMut(
            &ServerInner,
            &mut Vec<(Arc<LoopbackTransport>, ServerMessage)>,
            u64,
            ServerMessage,
        ),
    ) {
        let Some(doc) = inner.docs.get_mut(&key) else {
            debug!(%key, "submit for unknown document dropped");
            return;
        };
        if version != doc.version {
            let expected_version = doc.version;
            reply_to(
                inner,
                replies,
                from,
                ServerMessage::Rejected {
                    key,
                    expected_version,
                },
            );
            return;
        }
        if let Err(e) = apply_op(&mut doc.snapshot, &op) {
            warn!(%key, error = %e, "op does not apply to server snapshot; rejected");
            let expected_version = doc.version;
            reply_to(
                inner,
                replies,
                from,
                ServerMessage::Rejected {
                    key,
                    expected_version,
                },
            );
            return;
        }
        doc.version += 1;
        let new_version = doc.version;
        let others: Vec<u64> = doc
            .subscribers
            .iter()
            .copied()
            .filter(|subscriber| *subscriber != from)
            .collect();

        reply_to(
            inner,
            replies,
            from,
            ServerMessage::Ack {
                key: key.clone(),
                version: new_version,
            },
        );
        for subscriber in others {
            reply_to(
                inner,
                replies,
                subscriber,
                ServerMessage::Change {
                    key: key.clone(),
                    version: new_version,
                    op: op.clone(),
                },
            );
        }
    }

    fn drop_client(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.clients.remove(&id);
        for doc in inner.docs.values_mut() {
            doc.subscribers.remove(&id);
        }
    }
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LoopbackServer")
            .field("docs", &inner.docs.len())
            .field("clients", &inner.clients.len())
            .finish()
    }
}

/// One client's channel to a [`LoopbackServer`].
///
/// Every request is encoded to a CBOR frame, handed to the server, and
/// answered synchronously through the attached sink.
pub struct LoopbackTransport {
    id: u64,
    server: Arc<LoopbackServer>,
    sink: RwLock<Option<Arc<dyn TransportSink>>>,
    connected: Mutex<bool>,
}

impl LoopbackTransport {
    fn emit(&self, event: TransportEvent) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.on_transport_event(event);
        }
    }

    fn deliver(&self, message: ServerMessage) {
        let event = match message {
            ServerMessage::OpenOk {
                request,
                key,
                snapshot,
                version,
            } => TransportEvent::OpenCompleted {
                request,
                key,
                result: Ok(OpenedDoc { snapshot, version }),
            },
            ServerMessage::OpenError {
                request,
                key,
                message,
            } => TransportEvent::OpenCompleted {
                request,
                key,
                result: Err(message),
            },
            ServerMessage::Closed { key } => TransportEvent::CloseCompleted { key },
            ServerMessage::Change { key, version, op } => TransportEvent::Doc {
                key,
                event: DocEvent::Change { version, op },
            },
            ServerMessage::Ack { key, version } => TransportEvent::Doc {
                key,
                event: DocEvent::Acknowledge { version },
            },
            ServerMessage::Rejected {
                key,
                expected_version,
            } => TransportEvent::Doc {
                key,
                event: DocEvent::Rejected { expected_version },
            },
            ServerMessage::Presence { key, message } => TransportEvent::Doc {
                key,
                event: DocEvent::Presence(message),
            },
            ServerMessage::AuthRefreshed { error } => TransportEvent::AuthRefreshed {
                result: match error {
                    None => Ok(()),
                    Some(message) => Err(message),
                },
            },
        };
        self.emit(event);
    }

    fn send(&self, message: &ClientMessage) -> TransportResult<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }
        let frame = encode(message).map_err(|e| TransportError::send(e.to_string()))?;
        self.server.handle_frame(self.id, &frame)
    }
}

impl OtTransport for LoopbackTransport {
    fn attach(&self, sink: Arc<dyn TransportSink>) {
        *self.sink.write() = Some(sink);
    }

    fn connect(&self) -> TransportResult<()> {
        {
            let mut connected = self.connected.lock();
            if *connected {
                return Ok(());
            }
            *connected = true;
        }
        self.emit(TransportEvent::Status(ConnectionState::Connecting));
        self.emit(TransportEvent::Status(ConnectionState::Handshaking));
        self.emit(TransportEvent::Status(ConnectionState::Ready));
        Ok(())
    }

    fn open(&self, request: OpenRequestId, key: &DocKey) -> TransportResult<()> {
        self.send(&ClientMessage::Open {
            request,
            key: key.clone(),
        })
    }

    fn close_doc(&self, key: &DocKey) -> TransportResult<()> {
        self.send(&ClientMessage::Close { key: key.clone() })
    }

    fn submit(&self, key: &DocKey, version: u64, op: &OtOp) -> TransportResult<()> {
        self.send(&ClientMessage::Submit {
            key: key.clone(),
            version,
            op: op.clone(),
        })
    }

    fn send_presence(&self, key: &DocKey, message: &PresenceMessage) -> TransportResult<()> {
        self.send(&ClientMessage::Presence {
            key: key.clone(),
            session: message.session,
            user: message.user.clone(),
            payload: message.payload.clone(),
        })
    }

    fn refresh_auth(&self, token: &AuthToken) -> TransportResult<()> {
        self.send(&ClientMessage::RefreshAuth {
            token: token.as_str().to_string(),
        })
    }

    fn disconnect(&self) {
        {
            let mut connected = self.connected.lock();
            if !*connected {
                return;
            }
            *connected = false;
        }
        self.server.drop_client(self.id);
        self.emit(TransportEvent::Status(ConnectionState::Disconnected));
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("id", &self.id)
            .field("connected", &*self.connected.lock())
            .finish()
    }
}
