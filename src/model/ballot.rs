//! The `Ballot` entity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{BallotId, MeetingUserId, PollId};

/// A single ballot cast. `value` is the canonical encoded form of the
/// method-specific payload; for `secret` polls it is the base64 codec
/// output until finalize, at which point it is decrypted in place (spec
/// §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot {
    pub id: BallotId,
    pub poll_id: PollId,
    pub value: serde_json::Value,
    pub weight: Decimal,
    pub split: bool,
    /// `None` once the ballot has been anonymised.
    pub acting_user_id: Option<MeetingUserId>,
    /// `None` once the ballot has been anonymised.
    pub represented_user_id: Option<MeetingUserId>,
}
