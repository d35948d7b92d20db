//! Islands: per-category populations evolved semi-independently.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::schema::{Candidate, CandidateId, CandidateStatus, IslandId};

use super::arena::CandidateArena;

/// One island's full population history.
///
/// Every candidate ingested on the island is recorded here, whether or not it
/// won a feature map cell.
#[derive(Debug)]
pub struct Island {
    id: IslandId,
    category: String,
    population: RwLock<Vec<CandidateId>>,
}

impl Island {
    pub fn new(id: IslandId, category: impl Into<String>) -> Self {
        Self::with_population(id, category, Vec::new())
    }

    pub(crate) fn with_population(
        id: IslandId,
        category: impl Into<String>,
        population: Vec<CandidateId>,
    ) -> Self {
        Self {
            id,
            category: category.into(),
            population: RwLock::new(population),
        }
    }

    pub fn id(&self) -> IslandId {
        self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Append a candidate to the population.
    pub fn record(&self, id: CandidateId) {
        self.population.write().push(id);
    }

    /// Population ids in recording order.
    pub fn population(&self) -> Vec<CandidateId> {
        self.population.read().clone()
    }

    pub fn len(&self) -> usize {
        self.population.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.population.read().is_empty()
    }

    /// Members that currently occupy a feature map cell.
    pub fn elites(&self, arena: &CandidateArena) -> Vec<Arc<Candidate>> {
        arena.resolve_with_status(&self.population.read(), CandidateStatus::Elite)
    }

    /// Elites sorted by descending score, ties broken by id.
    pub fn ranked_elites(&self, arena: &CandidateArena) -> Vec<Arc<Candidate>> {
        let mut elites = self.elites(arena);
        elites.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        elites
    }
}
