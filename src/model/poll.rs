//! The `Poll` entity and its lifecycle-relevant enums.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::{ContentObjectId, GroupId, MeetingId, PollId};
use crate::methods::{MethodConfig, MethodName, MethodResult};

/// Confidentiality regime of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Manually,
    Named,
    Open,
    Secret,
}

/// Lifecycle state of a poll. Transitions strictly created -> started ->
/// finished; `reset` is the only reverse transition (see
/// [`crate::facade::VoteService::reset`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Created,
    Started,
    Finished,
}

/// The unit of voting. See spec §3 for the full invariant list; those
/// invariants are enforced by [`crate::facade::VoteService`], not by this
/// plain data struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub meeting_id: MeetingId,
    pub content_object_id: ContentObjectId,
    pub title: String,
    pub method: MethodName,
    pub config: MethodConfig,
    pub visibility: Visibility,
    pub state: PollState,
    pub published: bool,
    pub allow_invalid: bool,
    pub allow_vote_split: bool,
    pub result: Option<MethodResult>,
    pub entitled_group_ids: BTreeSet<GroupId>,
}

impl Poll {
    /// `named` polls cannot be anonymised (spec §3).
    pub fn can_anonymize(&self) -> bool {
        self.visibility != Visibility::Named
    }

    /// `secret` polls disallow vote splitting (spec §3).
    pub fn splitting_permitted(&self) -> bool {
        self.allow_vote_split && self.visibility != Visibility::Secret
    }

    /// `method`, `config`, `visibility`, `entitled_group_ids`,
    /// `allow_vote_split` are frozen once `state != created` (spec §3).
    pub fn structure_is_frozen(&self) -> bool {
        self.state != PollState::Created
    }
}
