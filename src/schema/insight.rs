//! Insight records.

use serde::{Deserialize, Serialize};

use super::{CandidateId, IslandId};

/// A distilled textual learning from evaluating a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    /// Generation the insight was filed in.
    pub generation: u64,
    #[serde(default)]
    pub island: Option<IslandId>,
    /// Candidate whose evaluation produced the insight.
    #[serde(default)]
    pub source: Option<CandidateId>,
    /// Combined score of the source candidate, used for performance impact.
    #[serde(default)]
    pub source_score: Option<f64>,
    /// Importance as of the last curation pass.
    #[serde(default)]
    pub importance: f64,
}

impl Insight {
    pub fn new(text: impl Into<String>, generation: u64) -> Self {
        Self {
            text: text.into(),
            generation,
            island: None,
            source: None,
            source_score: None,
            importance: 0.0,
        }
    }

    pub fn from_island(mut self, island: IslandId) -> Self {
        self.island = Some(island);
        self
    }

    pub fn from_candidate(mut self, source: CandidateId, score: f64) -> Self {
        self.source = Some(source);
        self.source_score = Some(score);
        self
    }
}
