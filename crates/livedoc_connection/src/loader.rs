//! Per-document load state machine.

use crate::config::LoaderConfig;
use crate::connection::{Connection, DocRoute};
use crate::doc::OtDoc;
use crate::error::{ConnectionResult, LoadError};
use crate::state::ConnectionState;
use crate::transport::{DocEvent, OpenedDoc};
use livedoc_protocol::{DocKey, OpenRequestId, OtOp};
use livedoc_reactive::{CleanupStack, Property};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// The externally observable state of a document load.
#[derive(Debug, Clone)]
pub enum DocLoad {
    /// Waiting: for the connection, for an open in flight, or for a close
    /// acknowledgment before the next open.
    Pending,
    /// The document is open.
    Open(Arc<OtDoc>),
    /// The load failed; retried automatically when the connection recovers.
    Error(LoadError),
    /// Intentionally not open (read-only or hidden). Distinct from `Error`.
    Closed,
}

impl DocLoad {
    /// The open document, when in `Open`.
    pub fn doc(&self) -> Option<&Arc<OtDoc>> {
        match self {
            DocLoad::Open(doc) => Some(doc),
            _ => None,
        }
    }

    /// Returns true when a document is open.
    pub fn is_open(&self) -> bool {
        matches!(self, DocLoad::Open(_))
    }
}

impl PartialEq for DocLoad {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DocLoad::Pending, DocLoad::Pending) => true,
            (DocLoad::Closed, DocLoad::Closed) => true,
            (DocLoad::Error(a), DocLoad::Error(b)) => a == b,
            // Same load state only if it is the same document instance.
            (DocLoad::Open(a), DocLoad::Open(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Where the loader is in the open/close protocol.
///
/// "Closing, then maybe reopen" is a first-class phase: the decision whether
/// to reopen is taken when the close acknowledgment arrives, from the
/// open-intent at that moment.
enum Phase {
    /// No document and no request outstanding.
    Idle,
    /// An open request is in flight.
    Opening { request: OpenRequestId },
    /// A document is open.
    Open { doc: Arc<OtDoc> },
    /// A close is awaiting acknowledgment.
    Closing,
}

struct LoaderInner {
    phase: Phase,
    conn_state: ConnectionState,
    intent: bool,
    carryover: Vec<OtOp>,
    failures: u32,
    last_error: Option<LoadError>,
    destroyed: bool,
}

/// Deferred side effects, executed after the state lock is released so that
/// listeners and the transport may re-enter the loader synchronously.
enum Effect {
    SetState(DocLoad),
    IssueOpen(OpenRequestId),
    CloseDoc(Arc<OtDoc>),
    CloseRaw,
    Reapply(Arc<OtDoc>, Vec<OtOp>),
}

/// The `Pending | Open | Error | Closed` state machine for one entity.
///
/// Driven by two inputs: the connection status property and an externally
/// supplied boolean open-intent property (`true` = attempt to edit).
/// Open/close requests are strictly serialized; a new open is never issued
/// while a close is unacknowledged. Every open carries a request id and only
/// the response to the most recent request is applied.
pub struct DocLoader {
    key: DocKey,
    connection: Arc<Connection>,
    config: LoaderConfig,
    state: Property<DocLoad>,
    inner: Mutex<LoaderInner>,
    cleanup: CleanupStack,
}

impl DocLoader {
    /// Creates a loader for `key`, registers it on the connection, and
    /// starts reacting to the status and intent properties.
    ///
    /// Fails when another loader already routes the same key.
    pub fn new(
        connection: Arc<Connection>,
        key: DocKey,
        intent: &Property<bool>,
        config: LoaderConfig,
    ) -> ConnectionResult<Arc<Self>> {
        let loader = Arc::new(Self {
            key: key.clone(),
            config,
            state: Property::new(DocLoad::Pending),
            inner: Mutex::new(LoaderInner {
                phase: Phase::Idle,
                conn_state: connection.status(),
                intent: intent.get(),
                carryover: Vec::new(),
                failures: 0,
                last_error: None,
                destroyed: false,
            }),
            cleanup: CleanupStack::new(),
            connection,
        });

        loader
            .connection
            .register_doc(key, Arc::downgrade(&loader) as Weak<dyn DocRoute>)?;
        {
            let unregister = {
                let connection = Arc::clone(&loader.connection);
                let key = loader.key.clone();
                move || connection.unregister_doc(&key)
            };
            loader.cleanup.defer(unregister);
        }

        let weak = Arc::downgrade(&loader);
        let status_sub = loader
            .connection
            .status_property()
            .on_change(move |state| {
                if let Some(loader) = weak.upgrade() {
                    loader.on_status(*state);
                }
            });
        loader.cleanup.defer_unsubscribe(status_sub);

        let weak = Arc::downgrade(&loader);
        let intent_sub = intent.on_change(move |intent| {
            if let Some(loader) = weak.upgrade() {
                loader.on_intent(*intent);
            }
        });
        loader.cleanup.defer_unsubscribe(intent_sub);

        let effects = {
            let mut inner = loader.inner.lock();
            loader.recompute(&mut inner)
        };
        loader.apply_effects(effects);
        Ok(loader)
    }

    /// The document key this loader manages.
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// The current load state.
    pub fn state(&self) -> DocLoad {
        self.state.get()
    }

    /// The load state property (consecutive duplicates suppressed).
    pub fn state_property(&self) -> &Property<DocLoad> {
        &self.state
    }

    /// The currently open document, if any.
    pub fn current_doc(&self) -> Option<Arc<OtDoc>> {
        match &self.inner.lock().phase {
            Phase::Open { doc } => Some(Arc::clone(doc)),
            _ => None,
        }
    }

    /// Tears the loader down: closes any open document, stops observing the
    /// input properties, and unregisters from the connection. Idempotent;
    /// results of operations still in flight are discarded.
    pub fn destroy(&self) {
        let effects = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            let mut effects = Vec::new();
            if let Phase::Open { doc } = std::mem::replace(&mut inner.phase, Phase::Idle) {
                effects.push(Effect::CloseDoc(doc));
            }
            effects.push(Effect::SetState(DocLoad::Closed));
            effects
        };
        self.apply_effects(effects);
        self.cleanup.run();
    }

    fn on_status(&self, state: ConnectionState) {
        trace!(key = %self.key, %state, "loader sees connection status");
        let effects = {
            let mut inner = self.inner.lock();
            inner.conn_state = state;
            self.recompute(&mut inner)
        };
        self.apply_effects(effects);
    }

    fn on_intent(&self, intent: bool) {
        let effects = {
            let mut inner = self.inner.lock();
            if intent && !inner.intent {
                // A fresh editing attempt gets a fresh failure budget.
                inner.failures = 0;
            }
            inner.intent = intent;
            self.recompute(&mut inner)
        };
        self.apply_effects(effects);
    }

    /// Decides the next move from the current phase and inputs.
    ///
    /// Called with the lock held; mutates the phase and returns the side
    /// effects to run after the lock is released.
    fn recompute(&self, inner: &mut LoaderInner) -> Vec<Effect> {
        if inner.destroyed {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match &inner.phase {
            Phase::Closing => {
                if inner.conn_state == ConnectionState::Disconnected {
                    // The close can never be acknowledged on a dead channel.
                    inner.phase = Phase::Idle;
                }
                effects.push(Effect::SetState(if inner.intent {
                    DocLoad::Pending
                } else {
                    DocLoad::Closed
                }));
            }
            Phase::Open { doc } => {
                if !inner.intent {
                    let doc = Arc::clone(doc);
                    inner.phase = Phase::Closing;
                    effects.push(Effect::CloseDoc(doc));
                    effects.push(Effect::SetState(DocLoad::Closed));
                } else if inner.conn_state == ConnectionState::Disconnected {
                    let doc = Arc::clone(doc);
                    if self.config.carry_local_ops {
                        inner.carryover = doc.take_unacknowledged();
                        if !inner.carryover.is_empty() {
                            debug!(
                                key = %self.key,
                                ops = inner.carryover.len(),
                                "carrying unacknowledged ops across reconnect"
                            );
                        }
                    }
                    inner.phase = Phase::Idle;
                    inner.last_error = Some(LoadError::Disconnected);
                    effects.push(Effect::CloseDoc(doc));
                    effects.push(Effect::SetState(DocLoad::Error(LoadError::Disconnected)));
                }
            }
            Phase::Opening { .. } => {
                if !inner.intent {
                    // The in-flight result will not match a current request
                    // and is discarded when it arrives.
                    inner.phase = Phase::Idle;
                    effects.push(Effect::SetState(DocLoad::Closed));
                } else if inner.conn_state == ConnectionState::Disconnected {
                    inner.phase = Phase::Idle;
                    inner.last_error = Some(LoadError::Disconnected);
                    effects.push(Effect::SetState(DocLoad::Error(LoadError::Disconnected)));
                } else {
                    effects.push(Effect::SetState(DocLoad::Pending));
                }
            }
            Phase::Idle => {
                if !inner.intent {
                    effects.push(Effect::SetState(DocLoad::Closed));
                } else {
                    match inner.conn_state {
                        ConnectionState::Ready => {
                            let budget = self.config.max_reopen_attempts;
                            if budget > 0 && inner.failures >= budget {
                                effects.push(Effect::SetState(DocLoad::Error(
                                    LoadError::TooManyAttempts {
                                        attempts: inner.failures,
                                    },
                                )));
                            } else {
                                let request = OpenRequestId::generate();
                                inner.phase = Phase::Opening { request };
                                effects.push(Effect::SetState(DocLoad::Pending));
                                effects.push(Effect::IssueOpen(request));
                            }
                        }
                        ConnectionState::Connecting | ConnectionState::Handshaking => {
                            effects.push(Effect::SetState(DocLoad::Pending));
                        }
                        ConnectionState::Disconnected => match &inner.last_error {
                            Some(error) => {
                                effects.push(Effect::SetState(DocLoad::Error(error.clone())));
                            }
                            None => effects.push(Effect::SetState(DocLoad::Pending)),
                        },
                    }
                }
            }
        }
        effects
    }

    fn apply_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SetState(state) => self.state.set(state),
                Effect::IssueOpen(request) => {
                    if let Err(e) = self.connection.open(request, &self.key) {
                        self.on_open_completed_inner(request, Err(e.to_string()));
                    }
                }
                Effect::CloseDoc(doc) => doc.close(),
                Effect::CloseRaw => {
                    let _ = self.connection.transport().close_doc(&self.key);
                }
                Effect::Reapply(doc, ops) => {
                    for op in ops {
                        if let Err(e) = doc.submit_op(op) {
                            warn!(
                                key = %self.key,
                                error = %e,
                                "carried op no longer applies; dropped"
                            );
                        }
                    }
                }
            }
        }
    }

    fn on_open_completed_inner(&self, request: OpenRequestId, result: Result<OpenedDoc, String>) {
        let effects = {
            let mut inner = self.inner.lock();
            let current = match &inner.phase {
                Phase::Opening { request: current } => Some(*current),
                _ => None,
            };
            if inner.destroyed || current != Some(request) {
                debug!(key = %self.key, %request, "discarding superseded open result");
                // A successful open nobody wants must still be closed.
                if result.is_ok() {
                    vec![Effect::CloseRaw]
                } else {
                    Vec::new()
                }
            } else {
                match result {
                    Ok(opened) => {
                        let doc = Arc::new(OtDoc::new(
                            self.key.clone(),
                            Arc::clone(self.connection.transport()),
                            opened.snapshot,
                            opened.version,
                        ));
                        let carryover = std::mem::take(&mut inner.carryover);
                        inner.phase = Phase::Open {
                            doc: Arc::clone(&doc),
                        };
                        inner.failures = 0;
                        inner.last_error = None;
                        vec![
                            Effect::Reapply(Arc::clone(&doc), carryover),
                            Effect::SetState(DocLoad::Open(doc)),
                        ]
                    }
                    Err(message) => {
                        inner.failures += 1;
                        inner.phase = Phase::Idle;
                        let error = LoadError::open_failed(message);
                        inner.last_error = Some(error.clone());
                        warn!(key = %self.key, failures = inner.failures, %error, "open failed");
                        // No immediate retry: the next `Ready` transition or
                        // intent toggle re-attempts.
                        vec![Effect::SetState(DocLoad::Error(error))]
                    }
                }
            }
        };
        self.apply_effects(effects);
    }
}

impl DocRoute for DocLoader {
    fn on_open_completed(&self, request: OpenRequestId, result: Result<OpenedDoc, String>) {
        self.on_open_completed_inner(request, result);
    }

    fn on_close_completed(&self) {
        let effects = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            match inner.phase {
                Phase::Closing => {
                    inner.phase = Phase::Idle;
                    self.recompute(&mut inner)
                }
                // A close ack we did not solicit (or one for a doc already
                // torn down) changes nothing.
                _ => Vec::new(),
            }
        };
        self.apply_effects(effects);
    }

    fn on_doc_event(&self, event: DocEvent) {
        let doc = {
            let inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            match &inner.phase {
                Phase::Open { doc } => Some(Arc::clone(doc)),
                _ => None,
            }
        };
        if let Some(doc) = doc {
            doc.handle(event);
        } else {
            trace!(key = %self.key, "doc event with no open doc dropped");
        }
    }
}

impl std::fmt::Debug for DocLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocLoader")
            .field("key", &self.key)
            .field("state", &self.state.get())
            .finish()
    }
}
