//! Method registry (spec §4.1).
//!
//! A method is any value providing `name`, `validate_config`,
//! `validate_ballot`, `tally`. Registration is static: the registry is
//! built once in [`MethodRegistry::new`] and never mutated afterwards.
//! New methods are added by extending [`MethodName`] and the match arm in
//! `new`.

pub mod approval;
pub mod rating_approval;
pub mod rating_score;
pub mod selection;
pub mod stv;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Option identifiers reserved by the data model; forbidden as
/// user-defined option identifiers (spec §3).
pub const RESERVED_OPTION_KEYS: &[&str] = &["abstain", "nota", "invalid"];

pub fn reject_reserved_options(options: &[String]) -> Result<(), MethodError> {
    for opt in options {
        let lower = opt.to_ascii_lowercase();
        if RESERVED_OPTION_KEYS.contains(&lower.as_str()) {
            return Err(MethodError::ReservedOption(opt.clone()));
        }
    }
    Ok(())
}

pub fn reject_duplicate_options(options: &[String]) -> Result<(), MethodError> {
    let mut seen = std::collections::HashSet::new();
    for opt in options {
        if !seen.insert(opt.as_str()) {
            return Err(MethodError::InvalidConfig(format!(
                "duplicate option identifier: {opt}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum MethodError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid ballot: {0}")]
    InvalidBallot(String),
    #[error("reserved option identifier used: {0}")]
    ReservedOption(String),
}

/// Tag identifying a voting method. The legacy names `motion`, `rating`
/// documented elsewhere are not accepted here; see DESIGN.md "Open
/// Question: method naming".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MethodName {
    Approval,
    Selection,
    RatingScore,
    RatingApproval,
    StvScottish,
}

impl std::fmt::Display for MethodName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MethodName::Approval => "approval",
            MethodName::Selection => "selection",
            MethodName::RatingScore => "rating-score",
            MethodName::RatingApproval => "rating-approval",
            MethodName::StvScottish => "stv-scottish",
        };
        write!(f, "{s}")
    }
}

/// Method-specific configuration, resolved from the untagged `config`
/// JSON value of a create request together with the poll's separately
/// carried `method` tag (spec §9: "the encoding is parsed once on load").
#[derive(Debug, Clone)]
pub enum MethodConfig {
    Approval(approval::ApprovalConfig),
    Selection(selection::SelectionConfig),
    RatingScore(rating_score::RatingScoreConfig),
    RatingApproval(rating_approval::RatingApprovalConfig),
    StvScottish(stv::StvConfig),
}

impl MethodConfig {
    pub fn method(&self) -> MethodName {
        match self {
            MethodConfig::Approval(_) => MethodName::Approval,
            MethodConfig::Selection(_) => MethodName::Selection,
            MethodConfig::RatingScore(_) => MethodName::RatingScore,
            MethodConfig::RatingApproval(_) => MethodName::RatingApproval,
            MethodConfig::StvScottish(_) => MethodName::StvScottish,
        }
    }

    /// Parse the untagged `config` JSON value against the shape expected
    /// by `method`, validating it in the same pass.
    pub fn parse(method: MethodName, raw: &serde_json::Value) -> Result<Self, MethodError> {
        let parsed = match method {
            MethodName::Approval => MethodConfig::Approval(
                serde_json::from_value(raw.clone())
                    .map_err(|e| MethodError::InvalidConfig(e.to_string()))?,
            ),
            MethodName::Selection => MethodConfig::Selection(
                serde_json::from_value(raw.clone())
                    .map_err(|e| MethodError::InvalidConfig(e.to_string()))?,
            ),
            MethodName::RatingScore => MethodConfig::RatingScore(
                serde_json::from_value(raw.clone())
                    .map_err(|e| MethodError::InvalidConfig(e.to_string()))?,
            ),
            MethodName::RatingApproval => MethodConfig::RatingApproval(
                serde_json::from_value(raw.clone())
                    .map_err(|e| MethodError::InvalidConfig(e.to_string()))?,
            ),
            MethodName::StvScottish => MethodConfig::StvScottish(
                serde_json::from_value(raw.clone())
                    .map_err(|e| MethodError::InvalidConfig(e.to_string()))?,
            ),
        };
        registry_method(parsed.method()).validate_config(&parsed)?;
        Ok(parsed)
    }

    /// Serialize back to the bare (untagged) JSON shape stored in the
    /// `config_json` column.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MethodConfig::Approval(c) => serde_json::to_value(c),
            MethodConfig::Selection(c) => serde_json::to_value(c),
            MethodConfig::RatingScore(c) => serde_json::to_value(c),
            MethodConfig::RatingApproval(c) => serde_json::to_value(c),
            MethodConfig::StvScottish(c) => serde_json::to_value(c),
        }
        .expect("method config types always serialize")
    }
}

/// The JSON shape every method's `tally` returns: a dynamic mapping keyed
/// by option identifier (plus STV's fixed `quota`/`elected`/`stages`
/// fields). Kept untyped rather than a tagged enum since option
/// identifiers are caller-defined, not known at compile time.
pub type MethodResult = serde_json::Value;

/// A ballot (or sub-ballot, after splitter expansion) ready for tallying:
/// a decimal weight and the method-specific payload.
#[derive(Debug, Clone)]
pub struct WeightedBallot {
    pub weight: Decimal,
    pub payload: serde_json::Value,
}

/// Extra inputs to `tally` that are not part of the ballot set itself.
/// Only [`stv`] consults `rng_seed`; every other method ignores it.
#[derive(Debug, Clone, Default)]
pub struct TallyContext {
    /// Deterministic seed for the STV initial candidate ordering (spec §9:
    /// "the implementation should allow a deterministic seed in tests").
    pub rng_seed: Option<u64>,
}

pub trait Method: Send + Sync {
    fn name(&self) -> MethodName;
    fn validate_config(&self, config: &MethodConfig) -> Result<(), MethodError>;
    fn validate_ballot(
        &self,
        config: &MethodConfig,
        payload: &serde_json::Value,
    ) -> Result<(), MethodError>;
    fn tally(
        &self,
        config: &MethodConfig,
        ballots: &[WeightedBallot],
        ctx: &TallyContext,
    ) -> Result<serde_json::Value, MethodError>;
}

/// Pluggable set of named methods. Registration is static: built once by
/// [`MethodRegistry::new`], used read-only afterwards from multiple
/// threads/tasks.
pub struct MethodRegistry {
    methods: HashMap<MethodName, Box<dyn Method>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut methods: HashMap<MethodName, Box<dyn Method>> = HashMap::new();
        methods.insert(MethodName::Approval, Box::new(approval::Approval));
        methods.insert(MethodName::Selection, Box::new(selection::Selection));
        methods.insert(
            MethodName::RatingScore,
            Box::new(rating_score::RatingScore),
        );
        methods.insert(
            MethodName::RatingApproval,
            Box::new(rating_approval::RatingApproval),
        );
        methods.insert(MethodName::StvScottish, Box::new(stv::StvScottish));
        Self { methods }
    }

    pub fn get(&self, name: MethodName) -> &dyn Method {
        self.methods
            .get(&name)
            .expect("every MethodName variant is registered")
            .as_ref()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Used by `MethodConfig::parse` to validate immediately after parsing,
// without requiring a registry instance at every call site.
fn registry_method(name: MethodName) -> Box<dyn Method> {
    match name {
        MethodName::Approval => Box::new(approval::Approval),
        MethodName::Selection => Box::new(selection::Selection),
        MethodName::RatingScore => Box::new(rating_score::RatingScore),
        MethodName::RatingApproval => Box::new(rating_approval::RatingApproval),
        MethodName::StvScottish => Box::new(stv::StvScottish),
    }
}

/// Decimal sum helper shared by every method's `tally`: zero-valued
/// buckets are omitted from the result map (spec §4.1.1-4.1.4).
pub(crate) fn insert_if_nonzero(
    map: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    value: Decimal,
) {
    if !value.is_zero() {
        map.insert(key.to_string(), serde_json::Value::String(decimal_str(value)));
    }
}

/// Canonical decimal-as-string rendition for result output (spec §6:
/// "decimal quantities appear as JSON strings"). `.normalize()` strips
/// trailing zeros picked up from the weight resolver's `1.000000`
/// default or from additions of differently-scaled weights, so
/// `"1"`/`"2"` come out rather than `"1.000000"`/`"2.000000"` (spec §8
/// scenarios 1-4).
pub(crate) fn decimal_str(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn insert_invalid_count(
    map: &mut serde_json::Map<String, serde_json::Value>,
    count: u64,
) {
    if count > 0 {
        map.insert("invalid".to_string(), serde_json::Value::from(count));
    }
}
