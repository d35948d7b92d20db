//! Seam between the database and the external strategy generator.

use std::sync::Arc;

use crate::schema::{Candidate, CandidateSubmission, Insight, IslandId};

use super::sampling::Cousins;

/// Everything the generator sees for one island step.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub island: IslandId,
    /// Category label of the island.
    pub category: String,
    pub generation: u64,
    pub parent: Arc<Candidate>,
    pub cousins: Cousins,
    /// Most recent insights, oldest first.
    pub insights: Vec<Insight>,
}

/// Produces and evaluates a new candidate from a parent and its context.
///
/// Called concurrently for different islands. Returning `None` skips the
/// island for this generation.
pub trait CandidateGenerator: Sync {
    fn generate(&self, request: &GenerationRequest) -> Option<CandidateSubmission>;
}

impl<F> CandidateGenerator for F
where
    F: Fn(&GenerationRequest) -> Option<CandidateSubmission> + Sync,
{
    fn generate(&self, request: &GenerationRequest) -> Option<CandidateSubmission> {
        self(request)
    }
}
