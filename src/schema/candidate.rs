//! Candidate strategy records and the inbound submission format.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metric holding the risk-adjusted return term of the combined score.
pub const SHARPE_RATIO: &str = "sharpe_ratio";
/// Metric holding the benchmark-relative term of the combined score.
pub const INFORMATION_RATIO: &str = "information_ratio";
/// Metric holding the drawdown term. Conventionally negative.
pub const MAX_DRAWDOWN: &str = "max_drawdown";

/// Island index. Islands are numbered densely from zero.
pub type IslandId = usize;

/// Arena-assigned candidate identifier. Monotonic in creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cand-{}", self.0)
    }
}

/// Discrete behavioral coordinates: one bin index per feature dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<u32>);

impl FeatureVector {
    pub fn new(bins: Vec<u32>) -> Self {
        Self(bins)
    }

    pub fn bins(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u32>> for FeatureVector {
    fn from(bins: Vec<u32>) -> Self {
        Self(bins)
    }
}

impl<const N: usize> From<[u32; N]> for FeatureVector {
    fn from(bins: [u32; N]) -> Self {
        Self(bins.to_vec())
    }
}

impl fmt::Display for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, bin) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{bin}")?;
        }
        write!(f, ")")
    }
}

/// Where a candidate lands in the feature map.
///
/// `Invalid` is out-of-band: no binning result can produce it, so invalid
/// candidates never collide with a real cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    Cell(FeatureVector),
    Invalid,
}

impl FeatureKey {
    /// The cell coordinates, if the candidate is valid.
    pub fn cell(&self) -> Option<&FeatureVector> {
        match self {
            FeatureKey::Cell(vector) => Some(vector),
            FeatureKey::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, FeatureKey::Invalid)
    }
}

/// Lifecycle state of a candidate.
///
/// `candidate → elite → displaced` or `candidate → rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Candidate,
    Elite,
    Displaced,
    Rejected,
}

impl CandidateStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            CandidateStatus::Candidate => 0,
            CandidateStatus::Elite => 1,
            CandidateStatus::Displaced => 2,
            CandidateStatus::Rejected => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CandidateStatus::Elite,
            2 => CandidateStatus::Displaced,
            3 => CandidateStatus::Rejected,
            _ => CandidateStatus::Candidate,
        }
    }
}

/// Upstream evaluator's verdict on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    #[default]
    Valid,
    Invalid,
}

/// Provenance of a migrated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Island the original candidate belongs to.
    pub origin_island: IslandId,
    /// The candidate this copy was made from.
    pub source: CandidateId,
}

/// A stored candidate strategy. Immutable once created; its status lives in
/// the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    /// Generation the candidate was created (or migrated) in.
    pub generation: u64,
    /// Island whose population owns this candidate.
    pub island: IslandId,
    pub hypothesis: String,
    pub code: String,
    /// Evaluator's free-text analysis.
    #[serde(default)]
    pub analysis: String,
    /// Finite backtest metrics.
    pub metrics: BTreeMap<String, f64>,
    /// Category tags.
    pub tags: BTreeSet<String>,
    /// Combined score used for elitism.
    pub score: f64,
    pub features: FeatureKey,
    #[serde(default)]
    pub parent: Option<CandidateId>,
    /// Set on migrated copies.
    #[serde(default)]
    pub lineage: Option<Lineage>,
}

impl Candidate {
    /// Copy this candidate into another island with a new identity.
    pub fn migrated_copy(&self, id: CandidateId, destination: IslandId, generation: u64) -> Self {
        Self {
            id,
            generation,
            island: destination,
            lineage: Some(Lineage {
                origin_island: self.island,
                source: self.id,
            }),
            ..self.clone()
        }
    }

    /// Feature-map cell, if valid.
    pub fn cell(&self) -> Option<&FeatureVector> {
        self.features.cell()
    }
}

/// Combined score `SR + IR + MDD`. Missing terms count as zero.
pub fn combined_score(metrics: &BTreeMap<String, f64>) -> f64 {
    let term = |key: &str| metrics.get(key).copied().unwrap_or(0.0);
    term(SHARPE_RATIO) + term(INFORMATION_RATIO) + term(MAX_DRAWDOWN)
}

/// Inbound candidate from the generator/backtest engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateSubmission {
    pub hypothesis: String,
    pub code: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub generation: u64,
    /// Island that produced the candidate.
    #[serde(default)]
    pub island: IslandId,
    #[serde(default)]
    pub parent: Option<CandidateId>,
    #[serde(default)]
    pub validity: Validity,
    /// Precomputed combined score. Computed from metrics when absent.
    #[serde(default)]
    pub score: Option<f64>,
    /// Precomputed feature vector. Encoded from metrics/tags when absent.
    #[serde(default)]
    pub features: Option<FeatureVector>,
    /// Insights extracted while evaluating this candidate.
    #[serde(default)]
    pub insights: Vec<String>,
}

impl CandidateSubmission {
    pub fn new(hypothesis: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            hypothesis: hypothesis.into(),
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = analysis.into();
        self
    }

    pub fn on_island(mut self, island: IslandId) -> Self {
        self.island = island;
        self
    }

    pub fn at_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_parent(mut self, parent: CandidateId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_features(mut self, features: impl Into<FeatureVector>) -> Self {
        self.features = Some(features.into());
        self
    }

    pub fn with_insight(mut self, insight: impl Into<String>) -> Self {
        self.insights.push(insight.into());
        self
    }

    /// Mark as failing upstream validation.
    pub fn invalid(mut self) -> Self {
        self.validity = Validity::Invalid;
        self
    }
}
