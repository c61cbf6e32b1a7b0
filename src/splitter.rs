//! Ballot-weight splitter (spec §4.2): decomposes a split ballot into
//! weighted sub-ballots, enforcing weight conservation against the
//! represented voter's effective weight.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::methods::{Method, MethodConfig, WeightedBallot};

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("split payload is not a mapping from decimal weight to sub-payload")]
    Malformed,
    #[error("sub-weights sum to more than the effective weight")]
    OverWeight,
    #[error("a sub-payload failed method validation")]
    SubBallotInvalid,
}

/// Expand one admitted ballot into the sub-ballots that the method's
/// `tally` actually consumes. `split = false` always yields exactly one
/// sub-ballot carrying the full effective weight.
pub fn split(
    method: &dyn Method,
    config: &MethodConfig,
    effective_weight: Decimal,
    split: bool,
    payload: &serde_json::Value,
) -> Result<Vec<WeightedBallot>, SplitError> {
    if !split {
        return Ok(vec![WeightedBallot {
            weight: effective_weight,
            payload: payload.clone(),
        }]);
    }

    let obj = payload.as_object().ok_or(SplitError::Malformed)?;
    let mut parsed: BTreeMap<Decimal, serde_json::Value> = BTreeMap::new();
    for (key, sub_payload) in obj {
        let weight: Decimal = key.parse().map_err(|_| SplitError::Malformed)?;
        parsed.insert(weight, sub_payload.clone());
    }

    let total: Decimal = parsed.keys().sum();
    if total > effective_weight {
        return Err(SplitError::OverWeight);
    }

    for (_, sub_payload) in &parsed {
        method
            .validate_ballot(config, sub_payload)
            .map_err(|_| SplitError::SubBallotInvalid)?;
    }

    Ok(parsed
        .into_iter()
        .map(|(weight, payload)| WeightedBallot { weight, payload })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::approval::{Approval, ApprovalConfig};
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn unsplit_ballot_keeps_full_weight() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let result = split(
            &Approval,
            &cfg,
            Decimal::from_str("3").unwrap(),
            false,
            &json!("yes"),
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].weight, Decimal::from_str("3").unwrap());
    }

    /// Spec §8 scenario 5: split enabled, effective weight 1, payload
    /// {"0.3":"Yes","0.7":"No"} → two sub-ballots of weight 0.3 and 0.7.
    #[test]
    fn scenario_5_within_weight() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let result = split(
            &Approval,
            &cfg,
            Decimal::from_str("1").unwrap(),
            true,
            &json!({"0.3": "Yes", "0.7": "No"}),
        )
        .unwrap();
        assert_eq!(result.len(), 2);
        let total: Decimal = result.iter().map(|b| b.weight).sum();
        assert_eq!(total, Decimal::from_str("1.0").unwrap());
    }

    /// Spec §8 scenario 5: {"1.3":"Yes","1.7":"No"} over-weight for
    /// effective weight 1 → rejected.
    #[test]
    fn scenario_5_over_weight_rejected() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let err = split(
            &Approval,
            &cfg,
            Decimal::from_str("1").unwrap(),
            true,
            &json!({"1.3": "Yes", "1.7": "No"}),
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::OverWeight));
    }

    #[test]
    fn invalid_sub_payload_rejects_whole_ballot() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let err = split(
            &Approval,
            &cfg,
            Decimal::from_str("1").unwrap(),
            true,
            &json!({"0.4": "maybe", "0.6": "no"}),
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::SubBallotInvalid));
    }

    #[test]
    fn malformed_payload_rejected() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let err = split(
            &Approval,
            &cfg,
            Decimal::from_str("1").unwrap(),
            true,
            &json!(["not", "a", "mapping"]),
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::Malformed));
    }
}
