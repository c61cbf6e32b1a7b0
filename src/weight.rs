//! Weight resolver (spec §4.4): computes the effective decimal weight for
//! a represented voter. Pure function over the preloaded meeting view, so
//! that admission never issues a database read beyond the preload (spec
//! §4.6's zero-further-reads invariant).

use rust_decimal::Decimal;

use crate::preload::{MeetingFlags, MeetingUserView};

/// The weight assigned when vote weighting is disabled for the meeting,
/// or when neither the meeting-scoped nor the underlying user carries a
/// non-zero weight (spec §4.4 rules 1 and 4).
pub fn default_weight() -> Decimal {
    Decimal::new(1_000_000, 6)
}

/// Resolve the effective weight for a represented voter, in order of
/// precedence:
/// 1. meeting does not enable vote weight -> `1.000000`
/// 2. meeting-scoped user has a non-zero `vote_weight` -> that value
/// 3. underlying user has a non-zero `default_vote_weight` -> that value
/// 4. otherwise -> `1.000000`
pub fn resolve_weight(flags: &MeetingFlags, member: &MeetingUserView) -> Decimal {
    if !flags.enable_vote_weight {
        return default_weight();
    }
    if let Some(w) = member.vote_weight {
        if !w.is_zero() {
            return w;
        }
    }
    if let Some(w) = member.default_vote_weight {
        if !w.is_zero() {
            return w;
        }
    }
    default_weight()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::str::FromStr;

    fn member(vote_weight: Option<&str>, default_vote_weight: Option<&str>) -> MeetingUserView {
        MeetingUserView {
            group_ids: BTreeSet::new(),
            vote_delegated_to: None,
            vote_weight: vote_weight.map(|s| Decimal::from_str(s).unwrap()),
            default_vote_weight: default_vote_weight.map(|s| Decimal::from_str(s).unwrap()),
        }
    }

    fn flags(enable_vote_weight: bool) -> MeetingFlags {
        MeetingFlags {
            enable_vote_weight,
            enable_vote_delegations: false,
            forbid_delegator_to_vote: false,
        }
    }

    #[test]
    fn disabled_weighting_always_returns_default() {
        let m = member(Some("5"), Some("3"));
        assert_eq!(resolve_weight(&flags(false), &m), default_weight());
    }

    #[test]
    fn meeting_scoped_weight_takes_precedence() {
        let m = member(Some("5"), Some("3"));
        assert_eq!(resolve_weight(&flags(true), &m), Decimal::from_str("5").unwrap());
    }

    #[test]
    fn falls_back_to_user_default_when_meeting_weight_zero() {
        let m = member(Some("0"), Some("3"));
        assert_eq!(resolve_weight(&flags(true), &m), Decimal::from_str("3").unwrap());
    }

    #[test]
    fn falls_back_to_default_weight_when_both_unset() {
        let m = member(None, None);
        assert_eq!(resolve_weight(&flags(true), &m), default_weight());
    }

    #[test]
    fn falls_back_to_default_weight_when_both_zero() {
        let m = member(Some("0"), Some("0"));
        assert_eq!(resolve_weight(&flags(true), &m), default_weight());
    }
}
