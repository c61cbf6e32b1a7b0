//! Eligibility checker (spec §4.5): presence, group membership,
//! delegation, and self-vote-forbidden rules. A pure function over the
//! preloaded meeting view — no direct store access, per spec §4.6's
//! zero-further-reads invariant.

use crate::model::MeetingUserId;
use crate::preload::PreloadedPollView;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("acting user is not present in the poll's meeting")]
    ActingNotPresent,
    #[error("represented user may not be the anonymous handle")]
    AnonymousRepresented,
    #[error("represented user is not entitled to vote in this poll")]
    NotEntitled,
    #[error("delegation is not enabled for this meeting")]
    DelegationDisabled,
    #[error("delegator is forbidden from voting directly once delegated")]
    DelegatorForbidden,
    #[error("represented user has not delegated their vote to the acting user")]
    NotDelegatedToActing,
}

/// Check whether `acting` may cast a ballot on behalf of `represented`
/// in the poll described by `view` (spec §4.5, steps 1-5).
pub fn check_eligibility(
    view: &PreloadedPollView,
    acting: MeetingUserId,
    represented: MeetingUserId,
) -> Result<(), EligibilityError> {
    if !view.present_user_ids.contains(&acting) {
        return Err(EligibilityError::ActingNotPresent);
    }
    if represented == MeetingUserId::ANONYMOUS {
        return Err(EligibilityError::AnonymousRepresented);
    }
    let represented_view = view
        .member(represented)
        .ok_or(EligibilityError::NotEntitled)?;
    if represented_view
        .group_ids
        .intersection(&view.entitled_group_ids)
        .next()
        .is_none()
    {
        return Err(EligibilityError::NotEntitled);
    }

    if acting == represented {
        let delegated = view.flags.enable_vote_delegations && represented_view.vote_delegated_to.is_some();
        if view.flags.forbid_delegator_to_vote && delegated {
            return Err(EligibilityError::DelegatorForbidden);
        }
        Ok(())
    } else {
        if !view.flags.enable_vote_delegations {
            return Err(EligibilityError::DelegationDisabled);
        }
        if represented_view.vote_delegated_to != Some(acting) {
            return Err(EligibilityError::NotDelegatedToActing);
        }
        Ok(())
    }
}
