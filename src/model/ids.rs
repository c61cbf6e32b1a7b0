//! Opaque identifiers used throughout the core.
//!
//! Kept as distinct newtypes (rather than bare `i64`) so a poll id can
//! never be passed where a meeting id is expected.

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(PollId);
id_newtype!(MeetingId);
id_newtype!(MeetingUserId);
id_newtype!(GroupId);
id_newtype!(BallotId);

impl MeetingUserId {
    /// Sentinel handle for the anonymous (not-logged-in) user. Never a
    /// legal `represented_user_id` (spec §4.5 step 2).
    pub const ANONYMOUS: MeetingUserId = MeetingUserId(0);
}

/// Opaque reference to the business object being decided (a motion,
/// assignment, or topic). The collection prefix (`motion/`, `assignment/`,
/// `topic/`) is carried alongside since it drives permission resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentObjectId {
    pub collection: String,
    pub id: i64,
}

impl std::fmt::Display for ContentObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
