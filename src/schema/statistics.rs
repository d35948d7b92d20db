//! Reporting types for the archive and database.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CandidateId, IslandId};

/// Distribution of scores over a set of candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl ScoreSummary {
    /// Summarize a set of scores, `None` when empty.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            min,
            max,
            mean,
            std: variance.sqrt(),
        })
    }
}

/// Feature map occupancy and elite score distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStatistics {
    pub filled_cells: u64,
    pub total_cells: u64,
    /// `filled_cells / total_cells`.
    pub coverage: f64,
    /// Insertions into empty cells.
    pub added: u64,
    /// Insertions that displaced a weaker elite.
    pub improved: u64,
    /// Candidates that failed insertion, including invalid ones.
    pub rejected: u64,
    pub scores: Option<ScoreSummary>,
}

/// Per-island counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandStatistics {
    pub id: IslandId,
    pub category: String,
    pub population: usize,
    /// Population members currently resident in the feature map.
    pub elites: usize,
    pub mean_score: Option<f64>,
    pub max_score: Option<f64>,
    pub best: Option<CandidateId>,
}

/// Whole-database snapshot of counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStatistics {
    pub generation: u64,
    pub islands: Vec<IslandStatistics>,
    pub archive: ArchiveStatistics,
    pub total_candidates: usize,
    pub total_elites: usize,
    pub rejected: usize,
    pub insights: usize,
    /// Perturbed neighbor lookups that found no usable cousin.
    pub neighbor_misses: u64,
    /// Candidates routed to the rejected archive by validation.
    pub validation_rejections: u64,
}

impl fmt::Display for DatabaseStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Generation {}", self.generation)?;
        writeln!(
            f,
            "Candidates: {} total, {} elite, {} rejected, {} insights",
            self.total_candidates, self.total_elites, self.rejected, self.insights
        )?;
        writeln!(
            f,
            "Coverage: {}/{} cells ({:.4}%)",
            self.archive.filled_cells,
            self.archive.total_cells,
            self.archive.coverage * 100.0
        )?;
        if let Some(scores) = &self.archive.scores {
            writeln!(
                f,
                "Elite scores: min {:.3}, max {:.3}, mean {:.3}, std {:.3}",
                scores.min, scores.max, scores.mean, scores.std
            )?;
        }
        writeln!(
            f,
            "Neighbor misses: {}, validation rejections: {}",
            self.neighbor_misses, self.validation_rejections
        )?;
        for island in &self.islands {
            write!(
                f,
                "  island {} ({}): {} candidates, {} elites",
                island.id, island.category, island.population, island.elites
            )?;
            if let (Some(max), Some(best)) = (island.max_score, island.best) {
                write!(f, ", best {best} ({max:.3})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
