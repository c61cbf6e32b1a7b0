//! Selection method (spec §4.1.2).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    insert_if_nonzero, insert_invalid_count, reject_duplicate_options, reject_reserved_options,
    Method, MethodConfig, MethodError, MethodName, TallyContext, WeightedBallot,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub options: Vec<String>,
    #[serde(default)]
    pub max_options_amount: Option<u32>,
    #[serde(default)]
    pub min_options_amount: Option<u32>,
    #[serde(default)]
    pub allow_nota: bool,
}

enum Choice {
    Options(Vec<String>),
    Nota,
    Abstain,
}

fn classify(cfg: &SelectionConfig, payload: &serde_json::Value) -> Option<Choice> {
    if let Some(s) = payload.as_str() {
        return if s.eq_ignore_ascii_case("nota") && cfg.allow_nota {
            Some(Choice::Nota)
        } else {
            None
        };
    }
    let arr = payload.as_array()?;
    let mut ids = Vec::with_capacity(arr.len());
    for item in arr {
        let id = item.as_str()?.to_string();
        if !cfg.options.contains(&id) {
            return None;
        }
        ids.push(id);
    }
    let mut seen = std::collections::HashSet::new();
    if !ids.iter().all(|id| seen.insert(id.clone())) {
        return None;
    }
    if ids.is_empty() {
        Some(Choice::Abstain)
    } else {
        Some(Choice::Options(ids))
    }
}

fn within_bounds(cfg: &SelectionConfig, count: usize) -> bool {
    if let Some(min) = cfg.min_options_amount {
        if (count as u32) < min && count != 0 {
            return false;
        }
    }
    if let Some(max) = cfg.max_options_amount {
        if count as u32 > max {
            return false;
        }
    }
    true
}

pub struct Selection;

impl Method for Selection {
    fn name(&self) -> MethodName {
        MethodName::Selection
    }

    fn validate_config(&self, config: &MethodConfig) -> Result<(), MethodError> {
        let MethodConfig::Selection(cfg) = config else {
            return Err(MethodError::InvalidConfig("not a selection config".into()));
        };
        reject_duplicate_options(&cfg.options)?;
        reject_reserved_options(&cfg.options)?;
        if let (Some(min), Some(max)) = (cfg.min_options_amount, cfg.max_options_amount) {
            if min > max {
                return Err(MethodError::InvalidConfig(
                    "min_options_amount exceeds max_options_amount".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_ballot(
        &self,
        config: &MethodConfig,
        payload: &serde_json::Value,
    ) -> Result<(), MethodError> {
        let MethodConfig::Selection(cfg) = config else {
            return Err(MethodError::InvalidConfig("not a selection config".into()));
        };
        match classify(cfg, payload) {
            Some(Choice::Options(ids)) if within_bounds(cfg, ids.len()) => Ok(()),
            Some(Choice::Options(_)) => Err(MethodError::InvalidBallot(
                "selection count outside configured bounds".into(),
            )),
            Some(Choice::Nota) | Some(Choice::Abstain) => Ok(()),
            None => Err(MethodError::InvalidBallot(
                "ballot must select known options, be empty, or be \"nota\"".into(),
            )),
        }
    }

    fn tally(
        &self,
        config: &MethodConfig,
        ballots: &[WeightedBallot],
        _ctx: &TallyContext,
    ) -> Result<serde_json::Value, MethodError> {
        let MethodConfig::Selection(cfg) = config else {
            return Err(MethodError::InvalidConfig("not a selection config".into()));
        };
        let mut sums: std::collections::BTreeMap<String, Decimal> = cfg
            .options
            .iter()
            .map(|o| (o.clone(), Decimal::ZERO))
            .collect();
        let mut abstain = Decimal::ZERO;
        let mut nota = Decimal::ZERO;
        let mut invalid = 0u64;

        for b in ballots {
            match classify(cfg, &b.payload) {
                Some(Choice::Options(ids)) if within_bounds(cfg, ids.len()) => {
                    for id in ids {
                        *sums.get_mut(&id).expect("classify validated membership") += b.weight;
                    }
                }
                Some(Choice::Abstain) => abstain += b.weight,
                Some(Choice::Nota) => nota += b.weight,
                _ => invalid += 1,
            }
        }

        let mut map = serde_json::Map::new();
        for (opt, total) in sums {
            insert_if_nonzero(&mut map, &opt, total);
        }
        insert_if_nonzero(&mut map, "abstain", abstain);
        insert_if_nonzero(&mut map, "nota", nota);
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
        MethodConfig::Selection(SelectionConfig {
            options: vec!["tom".into(), "gregor".into(), "hans".into()],
            max_options_amount: None,
            min_options_amount: None,
            allow_nota: false,
        })
    }

    #[test]
    fn scenario_3_with_abstain() {
        let cfg = cfg();
        let ballots = vec![
            WeightedBallot {
                weight: Decimal::from_str("1").unwrap(),
                payload: json!(["tom", "gregor"]),
            },
            WeightedBallot {
                weight: Decimal::from_str("1").unwrap(),
                payload: json!([]),
            },
            WeightedBallot {
                weight: Decimal::from_str("5").unwrap(),
                payload: json!([]),
            },
        ];
        let result = Selection.tally(&cfg, &ballots, &TallyContext::default()).unwrap();
        assert_eq!(result["tom"], "1");
        assert_eq!(result["gregor"], "1");
        assert_eq!(result["abstain"], "6");
        assert!(result.get("hans").is_none());
    }

    #[test]
    fn rejects_unknown_option() {
        let cfg = cfg();
        assert!(Selection.validate_ballot(&cfg, &json!(["unknown"])).is_err());
    }

    #[test]
    fn rejects_duplicate_selection() {
        let cfg = cfg();
        assert!(Selection.validate_ballot(&cfg, &json!(["tom", "tom"])).is_err());
    }
}
