//! The collaborative document: a path-addressed editing API over one
//! loader-managed OT document, with reactive consumer-facing state.

use crate::clock::{Clock, SystemClock};
use crate::entity::SharedEntity;
use crate::error::{DocError, DocResult};
use crate::normalize::normalize;
use crate::permission::{Action, PermissionEvaluator};
use crate::presence::PresenceHub;
use crate::reverter::Reverter;
use crate::schema::{ContentTypeSchema, LocaleConfig};
use livedoc_connection::{
    Connection, DocLoad, DocLoader, LoadError, LoaderConfig, OtDoc, OtDocEvent,
};
use livedoc_protocol::{OtComponent, OtOp, Path, Segment};
use livedoc_reactive::{CleanupStack, EventFeed, Property, Subscription};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// The consumer-facing status of a document, one value at a time.
///
/// When several conditions hold at once the most actionable one wins:
/// a user who cannot edit at all does not care that the connection is
/// also down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStatus {
    /// The current user may not edit this entity (permissions or an
    /// explicit read-only mode).
    EditingNotAllowed,
    /// The entity is archived; unarchive before editing.
    Archived,
    /// The document should be open but is not; the loader keeps retrying.
    ConnectionError,
    /// Everything is fine.
    Ok,
}

/// The reactive flags a document publishes alongside its content.
#[derive(Debug, Clone)]
pub struct DocState {
    /// True while local ops await server acknowledgment.
    pub is_saving: Property<bool>,
    /// True when the entity has unpublished changes; a pure function of sys.
    pub is_dirty: Property<bool>,
    /// True while an OT document is open.
    pub is_connected: Property<bool>,
}

impl DocState {
    fn new(is_dirty: bool) -> Self {
        Self {
            is_saving: Property::new(false),
            is_dirty: Property::new(is_dirty),
            is_connected: Property::new(false),
        }
    }
}

/// Configuration for one collaborative document.
pub struct CollabDocConfig {
    /// Loader behavior (reopen budget, op carryover).
    pub loader: LoaderConfig,
    /// Time source for sys timestamps.
    pub clock: Arc<dyn Clock>,
    /// Declared field shape; entries get their snapshot normalized against
    /// it at open time. `None` skips normalization.
    pub schema: Option<ContentTypeSchema>,
    /// Locales of the space.
    pub locales: LocaleConfig,
    /// Starts the document in read-only mode when true.
    pub read_only: bool,
    /// Display name announced in presence broadcasts.
    pub user: String,
}

impl CollabDocConfig {
    /// Default configuration for the given locales.
    pub fn new(locales: LocaleConfig) -> Self {
        Self {
            loader: LoaderConfig::default(),
            clock: Arc::new(SystemClock),
            schema: None,
            locales,
            read_only: false,
            user: "anonymous".into(),
        }
    }

    /// Sets the content type schema used for snapshot normalization.
    pub fn with_schema(mut self, schema: ContentTypeSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets the loader configuration.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts the document read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the display name announced in presence broadcasts.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

struct CollabInner {
    doc_sub: Subscription,
    memos: HashMap<Path, Property<Option<Value>>>,
    destroyed: bool,
}

/// One collaboratively edited entity.
///
/// Wraps a [`DocLoader`] and keeps the externally owned [`SharedEntity`] in
/// step with the OT snapshot: remote and local changes land in
/// `entity.fields`, acknowledgments advance `entity.sys`. All mutations go
/// through the path API and fail with `NotConnected` when no document is
/// open; nothing is buffered offline.
pub struct CollabDoc {
    entity: SharedEntity,
    loader: Arc<DocLoader>,
    clock: Arc<dyn Clock>,
    permissions: Arc<dyn PermissionEvaluator>,
    schema: Option<ContentTypeSchema>,
    locales: LocaleConfig,
    read_only: Property<bool>,
    intent: Property<bool>,
    state: DocState,
    status: Property<DocStatus>,
    presence: Arc<PresenceHub>,
    reverter: Arc<Reverter>,
    changes: EventFeed<Path>,
    inner: Mutex<CollabInner>,
    cleanup: CleanupStack,
    weak_self: Weak<CollabDoc>,
}

impl CollabDoc {
    /// Creates a document for `entity` on `connection` and starts loading
    /// if the user may edit.
    ///
    /// Fails when another document already manages the same entity on this
    /// connection.
    pub fn new(
        connection: Arc<Connection>,
        entity: SharedEntity,
        permissions: Arc<dyn PermissionEvaluator>,
        config: CollabDocConfig,
    ) -> DocResult<Arc<Self>> {
        let sys = entity.sys();
        let key = connection.doc_key(sys.entity_type, sys.id.clone());

        let read_only = Property::new(config.read_only);
        let can_update = permissions.can_perform(Action::Update, &sys);
        let intent = Property::new(!config.read_only && can_update);
        let loader = DocLoader::new(connection, key, &intent, config.loader)?;
        let presence = PresenceHub::new(config.user, Arc::clone(&config.clock));
        let reverter = Arc::new(Reverter::new(entity.clone(), Arc::clone(&loader)));

        let doc = Arc::new_cyclic(|weak_self| Self {
            status: Property::new(initial_status(
                can_update && !config.read_only,
                sys.is_archived(),
            )),
            state: DocState::new(sys.is_dirty()),
            entity,
            loader,
            clock: config.clock,
            permissions,
            schema: config.schema,
            locales: config.locales,
            read_only,
            intent,
            presence,
            reverter,
            changes: EventFeed::new(),
            inner: Mutex::new(CollabInner {
                doc_sub: Subscription::noop(),
                memos: HashMap::new(),
                destroyed: false,
            }),
            cleanup: CleanupStack::new(),
            weak_self: weak_self.clone(),
        });

        // Deferred first so teardown runs it last, after the subscriptions
        // below are gone.
        {
            let loader = Arc::clone(&doc.loader);
            doc.cleanup.defer(move || loader.destroy());
        }

        let weak = doc.weak_self.clone();
        let load_sub = doc.loader.state_property().subscribe(move |load| {
            if let Some(doc) = weak.upgrade() {
                doc.on_load(load);
            }
        });
        doc.cleanup.defer_unsubscribe(load_sub);

        Ok(doc)
    }

    /// The entity this document edits.
    pub fn entity(&self) -> &SharedEntity {
        &self.entity
    }

    /// The underlying loader.
    pub fn loader(&self) -> &Arc<DocLoader> {
        &self.loader
    }

    /// The reactive flags.
    pub fn state(&self) -> &DocState {
        &self.state
    }

    /// The consumer-facing status property.
    pub fn status(&self) -> &Property<DocStatus> {
        &self.status
    }

    /// The presence hub for this document; attached while a document is
    /// open, empty otherwise.
    pub fn presence(&self) -> &Arc<PresenceHub> {
        &self.presence
    }

    /// The reverter holding the last clean checkpoint of the field data.
    pub fn reverter(&self) -> &Arc<Reverter> {
        &self.reverter
    }

    /// Paths whose values changed, one event per applied operation. The
    /// root path is emitted when a document (re)opens.
    pub fn changes(&self) -> &EventFeed<Path> {
        &self.changes
    }

    /// The currently open OT document, if any.
    pub fn current_doc(&self) -> Option<Arc<OtDoc>> {
        self.loader.current_doc()
    }

    /// Whether the document is in read-only mode.
    pub fn is_read_only(&self) -> bool {
        self.read_only.get()
    }

    /// Switches read-only mode.
    ///
    /// Entering read-only closes the document; leaving it reopens when the
    /// user has edit permission. A fresh attempt resets the reopen budget.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
        self.recompute_intent();
        self.recompute_status();
    }

    /// A deep copy of the value at `path`: from the live snapshot when the
    /// document is open, from the entity otherwise.
    pub fn get_value_at(&self, path: &Path) -> Option<Value> {
        match self.loader.current_doc() {
            Some(doc) => doc.value_at(path),
            None => self.entity.read(|entity| entity.value_at(path)),
        }
    }

    /// A reactive handle on the value at `path`.
    ///
    /// Memoized per path for the lifetime of this document: repeated calls
    /// return handles to the same state, updated whenever a related change
    /// applies.
    pub fn value_property_at(&self, path: &Path) -> Property<Option<Value>> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.memos.get(path) {
            return existing.clone();
        }
        drop(inner);
        // Read outside the lock; get_value_at takes the loader's.
        let property = Property::new(self.get_value_at(path));
        let mut inner = self.inner.lock();
        inner
            .memos
            .entry(path.clone())
            .or_insert(property)
            .clone()
    }

    /// Sets the value at `path`, creating missing intermediate objects.
    ///
    /// Intermediate creation covers object keys only; a missing container
    /// addressed by index fails with `MissingContainer`. The root cannot be
    /// set.
    pub fn set_value_at(&self, path: &Path, value: Value) -> DocResult<()> {
        if path.is_root() {
            return Err(DocError::RootMutation);
        }
        let doc = self.open_doc()?;

        let mut components = Vec::new();
        let segments = path.segments();
        for depth in 1..segments.len() {
            let prefix = Path::from(segments[..depth].to_vec());
            if doc.value_at(&prefix).is_some() {
                continue;
            }
            match &segments[depth - 1] {
                Segment::Key(_) => components.push(OtComponent::Set {
                    path: prefix,
                    old: None,
                    new: Value::Object(Map::new()),
                }),
                Segment::Index(_) => {
                    return Err(DocError::MissingContainer {
                        path: prefix.parent().unwrap_or_else(Path::root),
                    })
                }
            }
        }
        components.push(OtComponent::Set {
            path: path.clone(),
            old: doc.value_at(path),
            new: value,
        });

        self.submit(&doc, OtOp::new(components)?)
    }

    /// Removes the value at `path`. Removing an absent value is a no-op.
    pub fn remove_value_at(&self, path: &Path) -> DocResult<()> {
        if path.is_root() {
            return Err(DocError::RootMutation);
        }
        let doc = self.open_doc()?;
        let Some(old) = doc.value_at(path) else {
            return Ok(());
        };
        let component = match path.last() {
            Some(Segment::Index(_)) => OtComponent::ListRemove {
                path: path.clone(),
                old: Some(old),
            },
            _ => OtComponent::Remove {
                path: path.clone(),
                old: Some(old),
            },
        };
        self.submit(&doc, OtOp::single(component))
    }

    /// Inserts `value` at `index` into the list at `path`.
    ///
    /// Inserting at index 0 into a missing or null container creates the
    /// list; any other index against a missing container fails with
    /// `MissingContainer`.
    pub fn insert_value_at(&self, path: &Path, index: usize, value: Value) -> DocResult<()> {
        if path.is_root() {
            return Err(DocError::RootMutation);
        }
        let doc = self.open_doc()?;
        let container = doc.value_at(path);
        let missing = matches!(container, None | Some(Value::Null));
        if missing {
            if index == 0 {
                return self.set_value_at(path, Value::Array(vec![value]));
            }
            return Err(DocError::MissingContainer { path: path.clone() });
        }
        doc.insert_at(path, index, value)?;
        self.state.is_saving.set(doc.has_unacknowledged());
        Ok(())
    }

    /// Appends `value` to the end of the list at `path`, creating the list
    /// when the container is missing or null.
    pub fn push_value_at(&self, path: &Path, value: Value) -> DocResult<()> {
        if path.is_root() {
            return Err(DocError::RootMutation);
        }
        let doc = self.open_doc()?;
        let end = match doc.value_at(path) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        };
        self.insert_value_at(path, end, value)
    }

    /// Moves the element at `from` in the list at `path` to `to`.
    pub fn move_value_at(&self, path: &Path, from: usize, to: usize) -> DocResult<()> {
        let doc = self.open_doc()?;
        doc.move_at(path, from, to)?;
        self.state.is_saving.set(doc.has_unacknowledged());
        Ok(())
    }

    /// Tears the document down: closes any open OT document, stops
    /// observing, and frees the entity's key on the connection. Idempotent.
    /// The entity itself is left as last synchronized.
    pub fn destroy(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.doc_sub = Subscription::noop();
            inner.memos.clear();
        }
        self.cleanup.run();
        self.presence.detach();
        self.state.is_connected.set(false);
        self.state.is_saving.set(false);
    }

    fn open_doc(&self) -> DocResult<Arc<OtDoc>> {
        self.loader.current_doc().ok_or(DocError::NotConnected)
    }

    fn submit(&self, doc: &Arc<OtDoc>, op: OtOp) -> DocResult<()> {
        doc.submit_op(op)?;
        // Recomputed rather than forced: a synchronous transport may have
        // acknowledged before submit_op returned.
        self.state.is_saving.set(doc.has_unacknowledged());
        Ok(())
    }

    fn recompute_intent(&self) {
        let can_update = self
            .permissions
            .can_perform(Action::Update, &self.entity.sys());
        self.intent.set(!self.read_only.get() && can_update);
    }

    fn recompute_status(&self) {
        let sys = self.entity.sys();
        let can_update = self.permissions.can_perform(Action::Update, &sys);
        let status = if !can_update || self.read_only.get() {
            DocStatus::EditingNotAllowed
        } else if sys.is_archived() {
            DocStatus::Archived
        } else if matches!(self.loader.state(), DocLoad::Error(_)) {
            DocStatus::ConnectionError
        } else {
            DocStatus::Ok
        };
        self.status.set(status);
    }

    fn on_load(&self, load: &DocLoad) {
        if self.inner.lock().destroyed {
            return;
        }
        match load {
            DocLoad::Open(doc) => self.on_open(doc),
            DocLoad::Pending | DocLoad::Closed => {
                self.inner.lock().doc_sub = Subscription::noop();
                self.state.is_connected.set(false);
                self.state.is_saving.set(false);
                self.recompute_status();
            }
            DocLoad::Error(error) => {
                self.inner.lock().doc_sub = Subscription::noop();
                self.state.is_connected.set(false);
                self.state.is_saving.set(false);
                if !matches!(error, LoadError::Disconnected) {
                    debug!(%error, "document load failed");
                }
                self.recompute_status();
            }
        }
    }

    fn on_open(&self, doc: &Arc<OtDoc>) {
        if let Some(schema) = &self.schema {
            doc.patch_snapshot(|snapshot| normalize(snapshot, schema, &self.locales));
        }
        self.sync_snapshot(&doc.snapshot(), doc.version());

        let weak = self.weak_self.clone();
        let subscription = doc.events().subscribe(move |event| {
            if let Some(this) = weak.upgrade() {
                this.on_doc_event(event);
            }
        });
        self.inner.lock().doc_sub = subscription;
        self.presence.attach(doc);

        self.state.is_connected.set(true);
        self.state.is_saving.set(doc.has_unacknowledged());
        self.recompute_status();
        self.republish_memos();
        self.changes.emit(Path::root());
    }

    fn on_doc_event(&self, event: &OtDocEvent) {
        match event {
            OtDocEvent::Change { components, remote } => {
                let doc = match self.loader.current_doc() {
                    Some(doc) => doc,
                    None => return,
                };
                self.sync_snapshot(&doc.snapshot(), doc.version());
                // Recomputed rather than latched: a synchronous transport
                // may acknowledge inside the submit call.
                self.state.is_saving.set(doc.has_unacknowledged());
                self.republish_memos();
                self.changes.emit(affected_path(components));
            }
            OtDocEvent::Acknowledged { version } => {
                self.on_acknowledged(*version);
            }
            OtDocEvent::Rejected { expected_version } => {
                trace!(expected_version, "op rejected; awaiting server catch-up");
            }
            OtDocEvent::Presence(_) | OtDocEvent::Closed => {}
        }
    }

    fn on_acknowledged(&self, version: u64) {
        let now = self.clock.now();
        self.entity.update(|entity| {
            if version > entity.sys.version {
                entity.sys.version = version;
                entity.sys.updated_at = now;
            }
        });
        let sys = self.entity.sys();
        self.state.is_dirty.set(sys.is_dirty());
        self.reverter.observe(&sys);
        let saving = self
            .loader
            .current_doc()
            .is_some_and(|doc| doc.has_unacknowledged());
        self.state.is_saving.set(saving);
        self.recompute_status();
    }

    /// Folds the OT snapshot into the entity.
    ///
    /// Fields always follow the snapshot. Sys follows only while the
    /// document version is ahead of the entity's, so a stale snapshot can
    /// never roll metadata back.
    ///
    /// Panics when the snapshot has no `sys` object: the server contract
    /// guarantees one, and editing without metadata would corrupt the
    /// entity.
    fn sync_snapshot(&self, snapshot: &Value, version: u64) {
        let sys_json = snapshot
            .get("sys")
            .unwrap_or_else(|| panic!("snapshot for {} has no sys object", self.loader.key()));
        let published_version = sys_json.get("publishedVersion").and_then(Value::as_u64);
        let archived_version = sys_json.get("archivedVersion").and_then(Value::as_u64);
        let fields = snapshot
            .get("fields")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let now = self.clock.now();

        self.entity.update(|entity| {
            entity.fields = fields;
            if version > entity.sys.version {
                entity.sys.version = version;
                entity.sys.updated_at = now;
                entity.sys.published_version = published_version;
                entity.sys.archived_version = archived_version;
            }
        });
        let sys = self.entity.sys();
        self.state.is_dirty.set(sys.is_dirty());
        self.reverter.observe(&sys);
    }

    /// Refreshes every memoized value property from the current content.
    /// Cheap at realistic memo counts; no per-path diffing needed because
    /// properties suppress unchanged sets.
    fn republish_memos(&self) {
        let memos: Vec<(Path, Property<Option<Value>>)> = {
            let inner = self.inner.lock();
            inner
                .memos
                .iter()
                .map(|(path, property)| (path.clone(), property.clone()))
                .collect()
        };
        for (path, property) in memos {
            property.set(self.get_value_at(&path));
        }
    }
}

fn initial_status(may_edit: bool, archived: bool) -> DocStatus {
    if !may_edit {
        DocStatus::EditingNotAllowed
    } else if archived {
        DocStatus::Archived
    } else {
        DocStatus::Ok
    }
}

fn affected_path(components: &[OtComponent]) -> Path {
    let mut iter = components.iter().map(OtComponent::affected_path);
    let first = iter.next().unwrap_or_else(Path::root);
    iter.fold(first, |acc, path| acc.common_prefix(&path))
}

impl std::fmt::Debug for CollabDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabDoc")
            .field("key", self.loader.key())
            .field("status", &self.status.get())
            .field("connected", &self.state.is_connected.get())
            .finish()
    }
}
