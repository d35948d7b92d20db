//! Serialized database state for resuming a run.

use serde::{Deserialize, Serialize};

use super::{
    Candidate, CandidateId, CandidateStatus, DatabaseConfig, FeatureVector, Insight, IslandId,
};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Full snapshot of an evolutionary database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub generation: u64,
    pub config: DatabaseConfig,
    /// Every candidate ever created, in id order.
    pub candidates: Vec<CandidateRecord>,
    pub islands: Vec<IslandRecord>,
    /// Occupied feature map cells.
    pub cells: Vec<CellRecord>,
    /// Rejected archive, in insertion order.
    pub rejected: Vec<CandidateId>,
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub counters: CheckpointCounters,
    /// Seed the sampling stream resumes from.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

/// A candidate and its lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub candidate: Candidate,
    pub status: CandidateStatus,
}

/// An island's identity and full population history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IslandRecord {
    pub id: IslandId,
    pub category: String,
    pub population: Vec<CandidateId>,
}

/// One occupied feature map cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub features: FeatureVector,
    pub occupant: CandidateId,
}

/// Running counters carried across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointCounters {
    pub added: u64,
    pub improved: u64,
    pub rejected: u64,
    pub neighbor_misses: u64,
    pub validation_rejections: u64,
}
