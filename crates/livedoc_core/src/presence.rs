//! Collaborator presence, derived purely from the document event stream.

use crate::clock::Clock;
use crate::error::{DocError, DocResult};
use chrono::{DateTime, Utc};
use livedoc_connection::{OtDoc, OtDocEvent};
use livedoc_protocol::{Path, PresenceMessage, PresencePayload, SessionId};
use livedoc_reactive::{Property, Subscription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

/// What the hub knows about one remote session.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    /// The remote session.
    pub session: SessionId,
    /// Display name of the collaborator.
    pub user: String,
    /// The path the collaborator last focused, if any.
    pub focus: Option<Path>,
    /// When the session was last heard from.
    pub last_seen: DateTime<Utc>,
}

struct HubInner {
    doc: Option<Arc<OtDoc>>,
    doc_events: Subscription,
    records: HashMap<SessionId, PresenceRecord>,
    by_path: HashMap<Path, Property<Vec<String>>>,
}

/// Tracks which collaborators are editing the attached document and where.
///
/// Presence is ephemeral: records exist only while a document is attached
/// and are discarded whole when it closes or is replaced. The hub never
/// reads the snapshot; everything it knows arrived as a presence broadcast.
pub struct PresenceHub {
    session: SessionId,
    user: String,
    clock: Arc<dyn Clock>,
    collaborators: Property<Vec<String>>,
    inner: Mutex<HubInner>,
    weak_self: Weak<PresenceHub>,
}

impl PresenceHub {
    /// Creates a hub for the local user with a fresh session id.
    pub fn new(user: impl Into<String>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            session: SessionId::generate(),
            user: user.into(),
            clock,
            collaborators: Property::new(Vec::new()),
            inner: Mutex::new(HubInner {
                doc: None,
                doc_events: Subscription::noop(),
                records: HashMap::new(),
                by_path: HashMap::new(),
            }),
            weak_self: weak_self.clone(),
        })
    }

    /// The local session id; broadcasts carrying it are ignored on receipt.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Sorted display names of everyone else editing the document.
    pub fn collaborators(&self) -> &Property<Vec<String>> {
        &self.collaborators
    }

    /// Sorted display names of collaborators focused at or below `path`.
    ///
    /// Properties are memoized per path: repeated calls return handles to
    /// the same underlying state.
    pub fn collaborators_for(&self, path: &Path) -> Property<Vec<String>> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.by_path.get(path) {
            return existing.clone();
        }
        let property = Property::new(names_focused_at(&inner.records, path));
        inner.by_path.insert(path.clone(), property.clone());
        property
    }

    /// Attaches the hub to a freshly opened document.
    ///
    /// Any records from a previous document are discarded; a collaborator's
    /// standing in one document says nothing about the next.
    pub fn attach(&self, doc: &Arc<OtDoc>) {
        let weak = self.weak_self.clone();
        let subscription = doc.events().subscribe(move |event| {
            if let Some(hub) = weak.upgrade() {
                hub.on_doc_event(event);
            }
        });
        {
            let mut inner = self.inner.lock();
            inner.doc = Some(doc.clone());
            inner.doc_events = subscription;
            inner.records.clear();
        }
        self.republish();
    }

    /// Detaches from the current document and forgets all records.
    pub fn detach(&self) {
        {
            let mut inner = self.inner.lock();
            inner.doc = None;
            inner.doc_events = Subscription::noop();
            inner.records.clear();
        }
        self.republish();
    }

    /// Broadcasts that the local user is focused at `path`.
    pub fn focus(&self, path: Path) -> DocResult<()> {
        self.broadcast(PresencePayload::Focus { path })
    }

    /// Broadcasts that the local user stopped focusing any path.
    pub fn blur(&self) -> DocResult<()> {
        self.broadcast(PresencePayload::Blur)
    }

    /// Broadcasts that the local user left the document.
    pub fn leave(&self) -> DocResult<()> {
        self.broadcast(PresencePayload::Leave)
    }

    fn broadcast(&self, payload: PresencePayload) -> DocResult<()> {
        let doc = self
            .inner
            .lock()
            .doc
            .clone()
            .ok_or(DocError::NotConnected)?;
        let message = PresenceMessage {
            session: self.session,
            user: self.user.clone(),
            payload,
        };
        doc.send_presence(&message)?;
        Ok(())
    }

    fn on_doc_event(&self, event: &OtDocEvent) {
        match event {
            OtDocEvent::Presence(message) => self.note(message.clone()),
            OtDocEvent::Closed => {
                // Final departure while the wire close has not gone out yet.
                if let Err(e) = self.leave() {
                    debug!(error = %e, "departure broadcast skipped");
                }
                self.detach();
            }
            _ => {}
        }
    }

    /// Records one presence broadcast. Broadcasts from the local session
    /// are ignored; loopback transports echo them back.
    pub fn note(&self, message: PresenceMessage) {
        if message.session == self.session {
            return;
        }
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            match message.payload {
                PresencePayload::Focus { path } => {
                    inner.records.insert(
                        message.session,
                        PresenceRecord {
                            session: message.session,
                            user: message.user,
                            focus: Some(path),
                            last_seen: now,
                        },
                    );
                }
                PresencePayload::Blur => {
                    inner.records.insert(
                        message.session,
                        PresenceRecord {
                            session: message.session,
                            user: message.user,
                            focus: None,
                            last_seen: now,
                        },
                    );
                }
                PresencePayload::Leave => {
                    inner.records.remove(&message.session);
                }
            }
        }
        self.republish();
    }

    /// A snapshot of the current records, for diagnostics.
    pub fn records(&self) -> Vec<PresenceRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| a.user.cmp(&b.user));
        records
    }

    /// Recomputes every published property from the record table.
    /// Properties are set outside the lock; listeners may call back in.
    fn republish(&self) {
        let (all, per_path) = {
            let inner = self.inner.lock();
            let mut all: Vec<String> =
                inner.records.values().map(|r| r.user.clone()).collect();
            all.sort();
            all.dedup();
            let per_path: Vec<(Property<Vec<String>>, Vec<String>)> = inner
                .by_path
                .iter()
                .map(|(path, property)| {
                    (property.clone(), names_focused_at(&inner.records, path))
                })
                .collect();
            (all, per_path)
        };
        self.collaborators.set(all);
        for (property, names) in per_path {
            property.set(names);
        }
    }
}

fn names_focused_at(records: &HashMap<SessionId, PresenceRecord>, path: &Path) -> Vec<String> {
    let mut names: Vec<String> = records
        .values()
        .filter(|record| {
            record
                .focus
                .as_ref()
                .is_some_and(|focus| focus.starts_with(path))
        })
        .map(|record| record.user.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

impl std::fmt::Debug for PresenceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PresenceHub")
            .field("session", &self.session)
            .field("user", &self.user)
            .field("records", &inner.records.len())
            .finish()
    }
}
