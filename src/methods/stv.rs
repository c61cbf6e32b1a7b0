//! Scottish STV method (spec §4.1.5): Single Transferable Vote under the
//! Scottish 2007 local-government rules.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::{
    decimal_str, reject_duplicate_options, reject_reserved_options, Method, MethodConfig,
    MethodError, MethodName, TallyContext, WeightedBallot,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StvConfig {
    pub posts: u32,
    pub options: Vec<String>,
}

fn parse_preferences(cfg: &StvConfig, payload: &serde_json::Value) -> Option<Vec<String>> {
    let arr = payload.as_array()?;
    let mut prefs = Vec::with_capacity(arr.len());
    let mut seen = std::collections::HashSet::new();
    for item in arr {
        let id = item.as_str()?.to_string();
        if !cfg.options.contains(&id) || !seen.insert(id.clone()) {
            return None;
        }
        prefs.push(id);
    }
    Some(prefs)
}

/// Truncate (never round) a fraction to 5 decimal places, per spec §4.1.5
/// step 3.
fn truncate5(d: Decimal) -> Decimal {
    d.trunc_with_scale(5)
}

struct BallotState {
    remaining: Vec<String>,
    weight: Decimal,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Status {
    Continuing,
    Elected,
    Excluded,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Continuing => "continuing",
            Status::Elected => "elected",
            Status::Excluded => "excluded",
        }
    }
}

pub struct StvScottish;

impl Method for StvScottish {
    fn name(&self) -> MethodName {
        MethodName::StvScottish
    }

    fn validate_config(&self, config: &MethodConfig) -> Result<(), MethodError> {
        let MethodConfig::StvScottish(cfg) = config else {
            return Err(MethodError::InvalidConfig("not an stv-scottish config".into()));
        };
        reject_duplicate_options(&cfg.options)?;
        reject_reserved_options(&cfg.options)?;
        if cfg.posts == 0 {
            return Err(MethodError::InvalidConfig("posts must be at least 1".into()));
        }
        if cfg.posts as usize > cfg.options.len() {
            return Err(MethodError::InvalidConfig(
                "posts exceeds number of candidates".into(),
            ));
        }
        Ok(())
    }

    fn validate_ballot(
        &self,
        config: &MethodConfig,
        payload: &serde_json::Value,
    ) -> Result<(), MethodError> {
        let MethodConfig::StvScottish(cfg) = config else {
            return Err(MethodError::InvalidConfig("not an stv-scottish config".into()));
        };
        parse_preferences(cfg, payload).map(|_| ()).ok_or_else(|| {
            MethodError::InvalidBallot(
                "ballot must be an ordered array of distinct known options".into(),
            )
        })
    }

    fn tally(
        &self,
        config: &MethodConfig,
        ballots: &[WeightedBallot],
        ctx: &TallyContext,
    ) -> Result<serde_json::Value, MethodError> {
        let MethodConfig::StvScottish(cfg) = config else {
            return Err(MethodError::InvalidConfig("not an stv-scottish config".into()));
        };

        let mut invalid = 0u64;
        let mut states: Vec<BallotState> = Vec::new();
        for b in ballots {
            match parse_preferences(cfg, &b.payload) {
                Some(prefs) if prefs.is_empty() => invalid += 1,
                Some(prefs) => states.push(BallotState {
                    remaining: prefs,
                    weight: b.weight,
                }),
                None => invalid += 1,
            }
        }

        let contributing = states.len() as u64;
        let posts = cfg.posts as u64;
        let quota = contributing / (posts + 1) + 1;

        let mut rng = match ctx.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order = cfg.options.clone();
        order.shuffle(&mut rng);

        let mut continuing = cfg.options.clone();
        let mut elected: Vec<String> = Vec::new();
        let mut last_votes: HashMap<String, Decimal> = cfg
            .options
            .iter()
            .map(|o| (o.clone(), Decimal::ZERO))
            .collect();
        let mut status: HashMap<String, Status> = cfg
            .options
            .iter()
            .map(|o| (o.clone(), Status::Continuing))
            .collect();
        let mut stages: Vec<serde_json::Value> = Vec::new();

        while elected.len() < cfg.posts as usize {
            // Step 1: credit each continuing ballot's current weight to its
            // first remaining preference.
            let mut votes: HashMap<String, Decimal> = continuing
                .iter()
                .map(|c| (c.clone(), Decimal::ZERO))
                .collect();
            for state in &states {
                if let Some(first) = state.remaining.first() {
                    if let Some(v) = votes.get_mut(first) {
                        *v += state.weight;
                    }
                }
            }
            for (cand, v) in &votes {
                last_votes.insert(cand.clone(), *v);
            }

            // Step 2: sort continuing candidates by votes descending, tied
            // candidates keep their relative order from `order` (last
            // stage's resolved order, seeded by the initial randomisation).
            let mut sorted = continuing.clone();
            sorted.sort_by(|a, b| {
                let va = votes[a];
                let vb = votes[b];
                vb.cmp(&va).then_with(|| {
                    let pa = order.iter().position(|x| x == a).unwrap_or(usize::MAX);
                    let pb = order.iter().position(|x| x == b).unwrap_or(usize::MAX);
                    pa.cmp(&pb)
                })
            });

            let remaining_seats = cfg.posts as usize - elected.len();

            // Step 5: if continuing candidates exactly fill the remaining
            // seats, elect them all and stop.
            if sorted.len() == remaining_seats {
                for cand in &sorted {
                    status.insert(cand.clone(), Status::Elected);
                    elected.push(cand.clone());
                }
                stages.push(stage_snapshot(&cfg.options, &last_votes, &status));
                continuing.clear();
                break;
            }

            let top = sorted[0].clone();
            let top_votes = votes[&top];

            if top_votes >= Decimal::from(quota) {
                // Step 3: elect, compute surplus, transfer.
                status.insert(top.clone(), Status::Elected);
                elected.push(top.clone());

                let f = if top_votes.is_zero() {
                    Decimal::ZERO
                } else {
                    truncate5((top_votes - Decimal::from(quota)) / top_votes)
                };
                for state in states.iter_mut() {
                    if state.remaining.first() == Some(&top) {
                        state.weight *= f;
                        state.remaining.retain(|c| c != &top);
                    }
                }
                continuing.retain(|c| c != &top);
            } else {
                // Step 4: exclude the bottom candidate.
                let bottom = sorted.last().expect("continuing is non-empty").clone();
                status.insert(bottom.clone(), Status::Excluded);
                for state in states.iter_mut() {
                    state.remaining.retain(|c| c != &bottom);
                }
                continuing.retain(|c| c != &bottom);
            }

            order = sorted;
            stages.push(stage_snapshot(&cfg.options, &last_votes, &status));
        }

        let mut result = serde_json::Map::new();
        if invalid > 0 {
            result.insert("invalid".into(), serde_json::Value::from(invalid));
        }
        result.insert("quota".into(), serde_json::Value::from(quota));
        result.insert(
            "elected".into(),
            serde_json::Value::Array(
                elected.into_iter().map(serde_json::Value::String).collect(),
            ),
        );
        result.insert("stages".into(), serde_json::Value::Array(stages));
        Ok(serde_json::Value::Object(result))
    }
}

fn stage_snapshot(
    options: &[String],
    votes: &HashMap<String, Decimal>,
    status: &HashMap<String, Status>,
) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for opt in options {
        map.insert(
            opt.clone(),
            json!({
                "votes": decimal_str(votes[opt]),
                "status": status[opt].as_str(),
            }),
        );
    }
    serde_json::Value::Object(map)
}
