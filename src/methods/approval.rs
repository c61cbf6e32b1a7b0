//! Approval method (spec §4.1.1).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    insert_if_nonzero, insert_invalid_count, Method, MethodConfig, MethodError, MethodName,
    TallyContext, WeightedBallot,
};

fn default_allow_abstain() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_allow_abstain")]
    pub allow_abstain: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            allow_abstain: default_allow_abstain(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Yes,
    No,
    Abstain,
}

fn parse_choice(payload: &serde_json::Value) -> Option<Choice> {
    let s = payload.as_str()?;
    match s.to_ascii_lowercase().as_str() {
        "yes" => Some(Choice::Yes),
        "no" => Some(Choice::No),
        "abstain" => Some(Choice::Abstain),
        _ => None,
    }
}

pub struct Approval;

impl Method for Approval {
    fn name(&self) -> MethodName {
        MethodName::Approval
    }

    fn validate_config(&self, _config: &MethodConfig) -> Result<(), MethodError> {
        Ok(())
    }

    fn validate_ballot(
        &self,
        config: &MethodConfig,
        payload: &serde_json::Value,
    ) -> Result<(), MethodError> {
        let MethodConfig::Approval(cfg) = config else {
            return Err(MethodError::InvalidConfig("not an approval config".into()));
        };
        match parse_choice(payload) {
            Some(Choice::Abstain) if !cfg.allow_abstain => Err(MethodError::InvalidBallot(
                "abstain is not allowed for this poll".into(),
            )),
            Some(_) => Ok(()),
            None => Err(MethodError::InvalidBallot(
                "ballot must be one of \"yes\", \"no\", \"abstain\"".into(),
            )),
        }
    }

    fn tally(
        &self,
        _config: &MethodConfig,
        ballots: &[WeightedBallot],
        _ctx: &TallyContext,
    ) -> Result<serde_json::Value, MethodError> {
        let mut yes = Decimal::ZERO;
        let mut no = Decimal::ZERO;
        let mut abstain = Decimal::ZERO;
        let mut invalid = 0u64;

        for b in ballots {
            match parse_choice(&b.payload) {
                Some(Choice::Yes) => yes += b.weight,
                Some(Choice::No) => no += b.weight,
                Some(Choice::Abstain) => abstain += b.weight,
                None => invalid += 1,
            }
        }

        let mut map = serde_json::Map::new();
        insert_if_nonzero(&mut map, "yes", yes);
        insert_if_nonzero(&mut map, "no", no);
        insert_if_nonzero(&mut map, "abstain", abstain);
        insert_invalid_count(&mut map, invalid);
        Ok(serde_json::Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ballot(choice: &str, weight: &str) -> WeightedBallot {
        WeightedBallot {
            weight: Decimal::from_str(weight).unwrap(),
            payload: serde_json::Value::String(choice.to_string()),
        }
    }

    #[test]
    fn scenario_1_basic_tally() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let ballots = vec![
            ballot("yes", "1"),
            ballot("yes", "1"),
            ballot("no", "1"),
        ];
        let result = Approval.tally(&cfg, &ballots, &TallyContext::default()).unwrap();
        assert_eq!(result["yes"], "2");
        assert_eq!(result["no"], "1");
        assert!(result.get("abstain").is_none());
        assert!(result.get("invalid").is_none());
    }

    #[test]
    fn scenario_2_with_invalid() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        let mut ballots = vec![
            ballot("yes", "1"),
            ballot("yes", "1"),
            ballot("no", "1"),
        ];
        ballots.push(WeightedBallot {
            weight: Decimal::from_str("1").unwrap(),
            payload: serde_json::Value::String("ABC".to_string()),
        });
        let result = Approval.tally(&cfg, &ballots, &TallyContext::default()).unwrap();
        assert_eq!(result["yes"], "2");
        assert_eq!(result["no"], "1");
        assert_eq!(result["invalid"], 1);
    }

    #[test]
    fn abstain_rejected_when_disallowed() {
        let cfg = MethodConfig::Approval(ApprovalConfig { allow_abstain: false });
        let err = Approval
            .validate_ballot(&cfg, &serde_json::Value::String("abstain".to_string()))
            .unwrap_err();
        assert!(matches!(err, MethodError::InvalidBallot(_)));
    }

    #[test]
    fn case_insensitive_choice() {
        let cfg = MethodConfig::Approval(ApprovalConfig::default());
        assert!(Approval
            .validate_ballot(&cfg, &serde_json::Value::String("YES".to_string()))
            .is_ok());
    }
}
