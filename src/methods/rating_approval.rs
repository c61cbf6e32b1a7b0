//! Rating-approval method (spec §4.1.4).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    decimal_str, insert_invalid_count, reject_duplicate_options, reject_reserved_options, Method,
    MethodConfig, MethodError, MethodName, TallyContext, WeightedBallot,
};

fn default_allow_abstain() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingApprovalConfig {
    pub options: Vec<String>,
    #[serde(default)]
    pub max_options_amount: Option<u32>,
    #[serde(default)]
    pub min_options_amount: Option<u32>,
    #[serde(default = "default_allow_abstain")]
    pub allow_abstain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Yes,
    No,
    Abstain,
}

fn parse_choice(v: &serde_json::Value) -> Option<Choice> {
    match v.as_str()?.to_ascii_lowercase().as_str() {
        "yes" => Some(Choice::Yes),
        "no" => Some(Choice::No),
        "abstain" => Some(Choice::Abstain),
        _ => None,
    }
}

fn classify(
    cfg: &RatingApprovalConfig,
    payload: &serde_json::Value,
) -> Option<BTreeMap<String, Choice>> {
    let obj = payload.as_object()?;
    let mut out = BTreeMap::new();
    let mut rated = 0u32;
    for (k, v) in obj {
        if !cfg.options.contains(k) {
            return None;
        }
        let choice = parse_choice(v)?;
        if choice == Choice::Abstain && !cfg.allow_abstain {
            return None;
        }
        if choice != Choice::Abstain {
            rated += 1;
        }
        out.insert(k.clone(), choice);
    }
    if let Some(min) = cfg.min_options_amount {
        if rated < min {
            return None;
        }
    }
    if let Some(max) = cfg.max_options_amount {
        if rated > max {
            return None;
        }
    }
    Some(out)
}

pub struct RatingApproval;

impl Method for RatingApproval {
    fn name(&self) -> MethodName {
        MethodName::RatingApproval
    }

    fn validate_config(&self, config: &MethodConfig) -> Result<(), MethodError> {
        let MethodConfig::RatingApproval(cfg) = config else {
            return Err(MethodError::InvalidConfig(
                "not a rating-approval config".into(),
            ));
        };
        reject_duplicate_options(&cfg.options)?;
        reject_reserved_options(&cfg.options)?;
        Ok(())
    }

    fn validate_ballot(
        &self,
        config: &MethodConfig,
        payload: &serde_json::Value,
    ) -> Result<(), MethodError> {
        let MethodConfig::RatingApproval(cfg) = config else {
            return Err(MethodError::InvalidConfig(
                "not a rating-approval config".into(),
            ));
        };
        classify(cfg, payload)
            .map(|_| ())
            .ok_or_else(|| MethodError::InvalidBallot(
                "ballot must map known options to \"yes\"/\"no\"/\"abstain\"".into(),
            ))
    }

    fn tally(
        &self,
        config: &MethodConfig,
        ballots: &[WeightedBallot],
        _ctx: &TallyContext,
    ) -> Result<serde_json::Value, MethodError> {
        let MethodConfig::RatingApproval(cfg) = config else {
            return Err(MethodError::InvalidConfig(
                "not a rating-approval config".into(),
            ));
        };
        let mut sums: BTreeMap<String, (Decimal, Decimal, Decimal)> = cfg
            .options
            .iter()
            .map(|o| (o.clone(), (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)))
            .collect();
        let mut invalid = 0u64;

        for b in ballots {
            match classify(cfg, &b.payload) {
                Some(choices) => {
                    for (opt, choice) in choices {
                        let entry = sums.get_mut(&opt).expect("classify validated membership");
                        match choice {
                            Choice::Yes => entry.0 += b.weight,
                            Choice::No => entry.1 += b.weight,
                            Choice::Abstain => entry.2 += b.weight,
                        }
                    }
                }
                None => invalid += 1,
            }
        }

        let mut map = serde_json::Map::new();
        for (opt, (yes, no, abstain)) in sums {
            if yes.is_zero() && no.is_zero() && abstain.is_zero() {
                continue;
            }
            let mut sub = serde_json::Map::new();
            if !yes.is_zero() {
                sub.insert("yes".into(), serde_json::Value::String(decimal_str(yes)));
            }
            if !no.is_zero() {
                sub.insert("no".into(), serde_json::Value::String(decimal_str(no)));
            }
            if !abstain.is_zero() {
                sub.insert(
                    "abstain".into(),
                    serde_json::Value::String(decimal_str(abstain)),
                );
            }
            map.insert(opt, serde_json::Value::Object(sub));
        }
        insert_invalid_count(&mut map, invalid);
        Ok(serde_json::Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn cfg() -> MethodConfig {
        MethodConfig::RatingApproval(RatingApprovalConfig {
            options: vec!["a".into(), "b".into()],
            max_options_amount: None,
            min_options_amount: None,
            allow_abstain: true,
        })
    }

    #[test]
    fn basic_tally() {
        let cfg = cfg();
        let ballots = vec![
            WeightedBallot {
                weight: Decimal::from_str("1").unwrap(),
                payload: json!({"a": "yes", "b": "no"}),
            },
            WeightedBallot {
                weight: Decimal::from_str("2").unwrap(),
                payload: json!({"a": "no", "b": "abstain"}),
            },
        ];
        let result = RatingApproval.tally(&cfg, &ballots, &TallyContext::default()).unwrap();
        assert_eq!(result["a"]["yes"], "1");
        assert_eq!(result["a"]["no"], "2");
        assert_eq!(result["b"]["no"], "1");
        assert_eq!(result["b"]["abstain"], "2");
    }

    #[test]
    fn rejects_abstain_when_disallowed() {
        let cfg = MethodConfig::RatingApproval(RatingApprovalConfig {
            options: vec!["a".into()],
            max_options_amount: None,
            min_options_amount: None,
            allow_abstain: false,
        });
        assert!(RatingApproval
            .validate_ballot(&cfg, &json!({"a": "abstain"}))
            .is_err());
    }
}
