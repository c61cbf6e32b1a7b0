//! Rating-score method (spec §4.1.3).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    insert_if_nonzero, insert_invalid_count, reject_duplicate_options, reject_reserved_options,
    Method, MethodConfig, MethodError, MethodName, TallyContext, WeightedBallot,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingScoreConfig {
    pub options: Vec<String>,
    #[serde(default)]
    pub max_options_amount: Option<u32>,
    #[serde(default)]
    pub min_options_amount: Option<u32>,
    #[serde(default)]
    pub max_votes_per_option: Option<u64>,
    #[serde(default)]
    pub max_vote_sum: Option<u64>,
    #[serde(default)]
    pub min_vote_sum: Option<u64>,
}

enum Choice {
    Scores(BTreeMap<String, u64>),
    Abstain,
}

fn classify(cfg: &RatingScoreConfig, payload: &serde_json::Value) -> Option<Choice> {
    let obj = payload.as_object()?;
    if obj.is_empty() {
        return Some(Choice::Abstain);
    }
    let mut scores = BTreeMap::new();
    for (k, v) in obj {
        if !cfg.options.contains(k) {
            return None;
        }
        let score = v.as_u64()?;
        scores.insert(k.clone(), score);
    }
    Some(Choice::Scores(scores))
}

fn within_bounds(cfg: &RatingScoreConfig, scores: &BTreeMap<String, u64>) -> bool {
    if let Some(max_each) = cfg.max_votes_per_option {
        if scores.values().any(|v| *v > max_each) {
            return false;
        }
    }
    let sum: u64 = scores.values().sum();
    if let Some(max_sum) = cfg.max_vote_sum {
        if sum > max_sum {
            return false;
        }
    }
    if let Some(min_sum) = cfg.min_vote_sum {
        if sum < min_sum {
            return false;
        }
    }
    let cardinality = scores.values().filter(|v| **v > 0).count() as u32;
    if let Some(min_card) = cfg.min_options_amount {
        if cardinality < min_card {
            return false;
        }
    }
    if let Some(max_card) = cfg.max_options_amount {
        if cardinality > max_card {
            return false;
        }
    }
    true
}

pub struct RatingScore;

impl Method for RatingScore {
    fn name(&self) -> MethodName {
        MethodName::RatingScore
    }

    fn validate_config(&self, config: &MethodConfig) -> Result<(), MethodError> {
        let MethodConfig::RatingScore(cfg) = config else {
            return Err(MethodError::InvalidConfig("not a rating-score config".into()));
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
        let MethodConfig::RatingScore(cfg) = config else {
            return Err(MethodError::InvalidConfig("not a rating-score config".into()));
        };
        match classify(cfg, payload) {
            Some(Choice::Scores(scores)) if within_bounds(cfg, &scores) => Ok(()),
            Some(Choice::Scores(_)) => Err(MethodError::InvalidBallot(
                "score outside configured bounds".into(),
            )),
            Some(Choice::Abstain) => Ok(()),
            None => Err(MethodError::InvalidBallot(
                "ballot must map known options to non-negative integer scores".into(),
            )),
        }
    }

    fn tally(
        &self,
        config: &MethodConfig,
        ballots: &[WeightedBallot],
        _ctx: &TallyContext,
    ) -> Result<serde_json::Value, MethodError> {
        let MethodConfig::RatingScore(cfg) = config else {
            return Err(MethodError::InvalidConfig("not a rating-score config".into()));
        };
        let mut sums: BTreeMap<String, Decimal> = cfg
            .options
            .iter()
            .map(|o| (o.clone(), Decimal::ZERO))
            .collect();
        let mut abstain = Decimal::ZERO;
        let mut invalid = 0u64;

        for b in ballots {
            match classify(cfg, &b.payload) {
                Some(Choice::Scores(scores)) if within_bounds(cfg, &scores) => {
                    for (opt, score) in scores {
                        *sums.get_mut(&opt).expect("classify validated membership") +=
                            b.weight * Decimal::from(score);
                    }
                }
                Some(Choice::Abstain) => abstain += b.weight,
                _ => invalid += 1,
            }
        }

        let mut map = serde_json::Map::new();
        for (opt, total) in sums {
            insert_if_nonzero(&mut map, &opt, total);
        }
        insert_if_nonzero(&mut map, "abstain", abstain);
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
        MethodConfig::RatingScore(RatingScoreConfig {
            options: vec!["a".into(), "b".into(), "c".into()],
            max_options_amount: None,
            min_options_amount: None,
            max_votes_per_option: None,
            max_vote_sum: None,
            min_vote_sum: None,
        })
    }

    #[test]
    fn scenario_4_weighted_sums() {
        let cfg = cfg();
        let ballots = vec![
            WeightedBallot {
                weight: Decimal::from_str("1").unwrap(),
                payload: json!({"a": 3, "b": 3}),
            },
            WeightedBallot {
                weight: Decimal::from_str("1").unwrap(),
                payload: json!({"b": 2, "c": 3}),
            },
            WeightedBallot {
                weight: Decimal::from_str("5").unwrap(),
                payload: json!({"c": 5}),
            },
        ];
        let result = RatingScore.tally(&cfg, &ballots, &TallyContext::default()).unwrap();
        assert_eq!(result["a"], "3");
        assert_eq!(result["b"], "5");
        assert_eq!(result["c"], "28");
    }
}
