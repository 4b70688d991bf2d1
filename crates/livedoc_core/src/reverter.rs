//! Restore local fields to the last clean snapshot.

use crate::entity::{SharedEntity, Sys};
use crate::error::{DocError, DocResult};
use livedoc_connection::DocLoader;
use livedoc_protocol::{OtComponent, OtOp, Path};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

struct Checkpoint {
    fields: Value,
    version: u64,
}

/// Remembers the field data of the last clean (fully published) state and
/// can submit one operation that swings the document back to it.
///
/// The revert is an ordinary collaborative edit: it goes through the open
/// document, collaborators see it, and the server versions it like any
/// other change.
pub struct Reverter {
    entity: SharedEntity,
    loader: Arc<DocLoader>,
    checkpoint: RwLock<Checkpoint>,
}

impl Reverter {
    /// Creates a reverter whose initial checkpoint is the entity's current
    /// field data.
    pub fn new(entity: SharedEntity, loader: Arc<DocLoader>) -> Self {
        let checkpoint = entity.read(|entity| Checkpoint {
            fields: entity.fields.clone(),
            version: entity.sys.version,
        });
        Self {
            entity,
            loader,
            checkpoint: RwLock::new(checkpoint),
        }
    }

    /// The entity version the checkpoint was taken at.
    pub fn checkpoint_version(&self) -> u64 {
        self.checkpoint.read().version
    }

    /// True when the current field data differs from the checkpoint.
    pub fn has_changes(&self) -> bool {
        let checkpoint = self.checkpoint.read();
        self.entity.read(|entity| entity.fields != checkpoint.fields)
    }

    /// Advances the checkpoint when the entity has reached a clean state.
    ///
    /// Called after every sys update; a dirty entity leaves the checkpoint
    /// where it is so the revert target stays the last published content.
    pub fn observe(&self, sys: &Sys) {
        if sys.is_dirty() {
            return;
        }
        let fields = self.entity.fields();
        let mut checkpoint = self.checkpoint.write();
        if sys.version > checkpoint.version {
            debug!(version = sys.version, "revert checkpoint advanced");
            checkpoint.fields = fields;
            checkpoint.version = sys.version;
        }
    }

    /// Submits one operation replacing the document's fields with the
    /// checkpoint's, and returns the document version once it is on the
    /// wire.
    ///
    /// Fails with `NotConnected` when no document is open. A no-op revert
    /// (no changes since the checkpoint) succeeds without submitting.
    pub fn revert(&self) -> DocResult<u64> {
        let doc = self.loader.current_doc().ok_or(DocError::NotConnected)?;
        let path = Path::keys(["fields"]);
        let current = doc.value_at(&path);
        let target = self.checkpoint.read().fields.clone();
        if current.as_ref() == Some(&target) {
            return Ok(doc.version());
        }
        doc.submit_op(OtOp::single(OtComponent::Set {
            path,
            old: current,
            new: target,
        }))?;
        Ok(doc.version())
    }
}

impl std::fmt::Debug for Reverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reverter")
            .field("checkpoint_version", &self.checkpoint.read().version)
            .field("has_changes", &self.has_changes())
            .finish()
    }
}
