//! The permission gate.
//!
//! Permission policy lives outside this crate; the document layer only
//! consumes boolean decisions. `can_perform(Update, ..)` feeds directly
//! into the document's open intent and status.

use crate::entity::Sys;

/// An action a user may or may not be allowed to perform on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read the entity.
    Read,
    /// Edit field data.
    Update,
    /// Delete the entity.
    Delete,
    /// Archive the entity.
    Archive,
    /// Unarchive the entity.
    Unarchive,
    /// Publish the entity.
    Publish,
    /// Unpublish the entity.
    Unpublish,
}

/// Decides whether the current user may perform an action on an entity.
pub trait PermissionEvaluator: Send + Sync {
    /// Returns true when `action` is allowed against an entity with the
    /// given metadata.
    fn can_perform(&self, action: Action, sys: &Sys) -> bool;
}

/// Grants every action; the default for tests and single-user tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionEvaluator for AllowAll {
    fn can_perform(&self, _action: Action, _sys: &Sys) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Sys;
    use crate::EntityType;
    use chrono::Utc;

    struct ReadOnlyRole;

    impl PermissionEvaluator for ReadOnlyRole {
        fn can_perform(&self, action: Action, _sys: &Sys) -> bool {
            action == Action::Read
        }
    }

    #[test]
    fn custom_evaluators_plug_in() {
        let sys = Sys::new("E1", EntityType::Entry, Utc::now());
        assert!(ReadOnlyRole.can_perform(Action::Read, &sys));
        assert!(!ReadOnlyRole.can_perform(Action::Update, &sys));
        assert!(AllowAll.can_perform(Action::Update, &sys));
    }
}
