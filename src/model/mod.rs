//! Data model shared by every component: identifiers, the poll entity and
//! its lifecycle enums, and the ballot entity.

pub mod ballot;
pub mod ids;
pub mod poll;

pub use ballot::Ballot;
pub use ids::{BallotId, ContentObjectId, GroupId, MeetingId, MeetingUserId, PollId};
pub use poll::{Poll, PollState, Visibility};
