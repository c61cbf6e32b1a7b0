//! Permission checker collaborator (spec §6): the facade authorises every
//! write operation by delegating to an external policy module keyed on
//! the poll's `content_object_id` and `meeting_id`. Permission computation
//! itself is explicitly out of scope (spec §1); this module only defines
//! the trait boundary and a table-driven mock for tests, mirroring the
//! crate's `SignalClient`/`MockSignalClient` split.

use async_trait::async_trait;

use crate::model::{ContentObjectId, MeetingId, MeetingUserId};

/// The permission required for a given content-object collection (spec
/// §6's permission table): `motion/*` -> `motion.can_manage_polls`,
/// `assignment/*` -> `assignment.can_manage_polls`, `topic/*` ->
/// `poll.can_manage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiredPermission {
    MotionManagePolls,
    AssignmentManagePolls,
    PollCanManage,
}

impl RequiredPermission {
    /// Resolve the permission required to manage polls on the given
    /// content object, per spec §6's collection table.
    pub fn for_collection(collection: &str) -> Result<Self, UnknownCollection> {
        match collection {
            "motion" => Ok(Self::MotionManagePolls),
            "assignment" => Ok(Self::AssignmentManagePolls),
            "topic" => Ok(Self::PollCanManage),
            other => Err(UnknownCollection(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised content object collection: {0}")]
pub struct UnknownCollection(pub String);

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error(transparent)]
    UnknownCollection(#[from] UnknownCollection),
    #[error("caller does not hold {permission:?} for {content_object_id} in meeting {meeting_id}")]
    Denied {
        content_object_id: ContentObjectId,
        meeting_id: MeetingId,
        permission: RequiredPermission,
    },
}

/// External policy module stand-in (spec §1 non-goal: "permission
/// computation (delegated to an external policy module)").
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn check(
        &self,
        acting_user_id: MeetingUserId,
        content_object_id: &ContentObjectId,
        meeting_id: MeetingId,
        permission: RequiredPermission,
    ) -> Result<(), PermissionError>;
}

/// Table-driven mock used by facade tests: always-allow by default, or
/// configured with explicit denials.
pub struct MockPermissionChecker {
    denied: std::sync::Mutex<std::collections::HashSet<(MeetingUserId, MeetingId)>>,
}

impl MockPermissionChecker {
    pub fn allow_all() -> Self {
        Self {
            denied: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn deny(&self, acting_user_id: MeetingUserId, meeting_id: MeetingId) {
        self.denied
            .lock()
            .unwrap()
            .insert((acting_user_id, meeting_id));
    }
}

#[async_trait]
impl PermissionChecker for MockPermissionChecker {
    async fn check(
        &self,
        acting_user_id: MeetingUserId,
        content_object_id: &ContentObjectId,
        meeting_id: MeetingId,
        permission: RequiredPermission,
    ) -> Result<(), PermissionError> {
        if self
            .denied
            .lock()
            .unwrap()
            .contains(&(acting_user_id, meeting_id))
        {
            return Err(PermissionError::Denied {
                content_object_id: content_object_id.clone(),
                meeting_id,
                permission,
            });
        }
        Ok(())
    }
}
