//! The shared, authenticated channel to the collaboration server.

use crate::config::{AuthToken, ConnectionConfig};
use crate::error::{ConnectionError, ConnectionResult, TransportResult};
use crate::state::ConnectionState;
use crate::transport::{DocEvent, OpenedDoc, OtTransport, TransportEvent, TransportSink};
use livedoc_protocol::{DocKey, EntityType, OpenRequestId};
use livedoc_reactive::{Property, Subscription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Receives routed completions and document events for one registered key.
///
/// Implemented by [`DocLoader`](crate::DocLoader).
pub trait DocRoute: Send + Sync {
    /// An open for this key completed.
    fn on_open_completed(&self, request: OpenRequestId, result: Result<OpenedDoc, String>);

    /// A close for this key was acknowledged.
    fn on_close_completed(&self);

    /// A document event for this key arrived.
    fn on_doc_event(&self, event: DocEvent);
}

struct ConnectionInner {
    routes: HashMap<DocKey, Weak<dyn DocRoute>>,
    refresh_in_flight: bool,
    closed: bool,
    auth_subscription: Option<Subscription>,
}

/// One process-wide channel multiplexing every open document.
///
/// The connection owns the transport's status as a deduplicated property,
/// routes per-document events to registered loaders, and keeps the auth
/// token fresh. All loaders share one connection; each document key may be
/// registered by at most one loader at a time.
pub struct Connection {
    config: ConnectionConfig,
    transport: Arc<dyn OtTransport>,
    status: Property<ConnectionState>,
    inner: Mutex<ConnectionInner>,
}

impl Connection {
    /// Creates a connection, attaches it to the transport, and starts
    /// observing the auth token property.
    ///
    /// Token changes while the connection is `Ready` trigger a refresh on
    /// the transport; overlapping refreshes are coalesced into the one in
    /// flight. A failed refresh is fatal and disconnects.
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn OtTransport>,
        auth: &Property<AuthToken>,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            config,
            transport,
            status: Property::new(ConnectionState::Disconnected),
            inner: Mutex::new(ConnectionInner {
                routes: HashMap::new(),
                refresh_in_flight: false,
                closed: false,
                auth_subscription: None,
            }),
        });

        connection
            .transport
            .attach(Arc::clone(&connection) as Arc<dyn TransportSink>);

        let weak = Arc::downgrade(&connection);
        let subscription = auth.on_change(move |token| {
            if let Some(connection) = weak.upgrade() {
                connection.refresh_auth(token);
            }
        });
        connection.inner.lock().auth_subscription = Some(subscription);

        connection
    }

    /// Starts the transport.
    pub fn connect(&self) -> TransportResult<()> {
        self.transport.connect()
    }

    /// The configuration this connection was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The current connection state.
    pub fn status(&self) -> ConnectionState {
        self.status.get()
    }

    /// The connection state property (consecutive duplicates suppressed).
    pub fn status_property(&self) -> &Property<ConnectionState> {
        &self.status
    }

    /// Builds the key for an entity on this connection's space/environment.
    pub fn doc_key(&self, entity_type: EntityType, id: impl Into<String>) -> DocKey {
        DocKey::new(
            self.config.space.clone(),
            self.config.environment.clone(),
            entity_type,
            id,
        )
    }

    /// The transport behind this connection.
    pub(crate) fn transport(&self) -> &Arc<dyn OtTransport> {
        &self.transport
    }

    /// Registers the route for a document key.
    ///
    /// At most one loader may route a key at a time; a second registration
    /// is a caller error and is rejected rather than silently replacing the
    /// first.
    pub(crate) fn register_doc(
        &self,
        key: DocKey,
        route: Weak<dyn DocRoute>,
    ) -> ConnectionResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(ConnectionError::Closed);
        }
        if let Some(existing) = inner.routes.get(&key) {
            if existing.strong_count() > 0 {
                return Err(ConnectionError::AlreadyRegistered { key });
            }
        }
        inner.routes.insert(key, route);
        Ok(())
    }

    /// Removes the route for a document key.
    pub(crate) fn unregister_doc(&self, key: &DocKey) {
        self.inner.lock().routes.remove(key);
    }

    /// Issues an open request for a key.
    pub(crate) fn open(&self, request: OpenRequestId, key: &DocKey) -> TransportResult<()> {
        trace!(%key, %request, "issuing open");
        self.transport.open(request, key)
    }

    fn route(&self, key: &DocKey) -> Option<Arc<dyn DocRoute>> {
        self.inner.lock().routes.get(key).and_then(Weak::upgrade)
    }

    fn refresh_auth(&self, token: &AuthToken) {
        if !self.status().is_ready() {
            debug!("auth token changed while not connected; ignoring");
            return;
        }
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if inner.refresh_in_flight {
                trace!("auth refresh already in flight; coalescing");
                return;
            }
            inner.refresh_in_flight = true;
        }
        if let Err(e) = self.transport.refresh_auth(token) {
            warn!(error = %e, "auth refresh could not be sent; disconnecting");
            self.inner.lock().refresh_in_flight = false;
            self.transport.disconnect();
        }
    }

    /// Tears down the transport and stops observing the auth token.
    /// Idempotent.
    pub fn close(&self) {
        let already_closed = {
            let mut inner = self.inner.lock();
            let already = inner.closed;
            inner.closed = true;
            inner.auth_subscription.take();
            already
        };
        if !already_closed {
            self.transport.disconnect();
        }
    }
}

impl TransportSink for Connection {
    fn on_transport_event(&self, event: TransportEvent) {
        if self.inner.lock().closed {
            return;
        }
        match event {
            TransportEvent::Status(state) => {
                trace!(%state, "connection status");
                self.status.set(state);
            }
            TransportEvent::OpenCompleted {
                request,
                key,
                result,
            } => match self.route(&key) {
                Some(route) => route.on_open_completed(request, result),
                None => {
                    // No loader wants this doc anymore; do not leak an open.
                    if result.is_ok() {
                        debug!(%key, %request, "open completed for unrouted key; closing");
                        let _ = self.transport.close_doc(&key);
                    }
                }
            },
            TransportEvent::CloseCompleted { key } => {
                if let Some(route) = self.route(&key) {
                    route.on_close_completed();
                }
            }
            TransportEvent::Doc { key, event } => {
                if let Some(route) = self.route(&key) {
                    route.on_doc_event(event);
                } else {
                    trace!(%key, "doc event for unrouted key dropped");
                }
            }
            TransportEvent::AuthRefreshed { result } => {
                self.inner.lock().refresh_in_flight = false;
                if let Err(message) = result {
                    warn!(%message, "auth refresh failed; disconnecting");
                    self.transport.disconnect();
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.config.endpoint_url)
            .field("status", &self.status.get())
            .finish()
    }
}
