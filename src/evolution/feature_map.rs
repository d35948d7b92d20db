//! MAP-Elites feature map shared by every island.
//!
//! Each cell holds at most one elite. Cells sit behind their own mutex under a
//! read-mostly index, so concurrent insertions into different cells only share
//! a read lock, while insertions into the same cell serialize and compare
//! scores under exclusion.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::schema::{
    ArchiveStatistics, Candidate, CandidateId, CandidateStatus, FeatureVector, ScoreSummary,
};

use super::arena::{CandidateArena, RejectedArchive};
use super::encoder::{DimensionError, FeatureEncoder};

#[derive(Debug, Clone, Copy)]
struct Occupant {
    id: CandidateId,
    score: f64,
}

type Cell = Arc<Mutex<Option<Occupant>>>;

/// Result of offering a candidate to the feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Filled an empty cell.
    Inserted,
    /// Beat the previous occupant, which moved to the rejected archive.
    Improved { displaced: CandidateId },
    /// Did not beat the occupant; the map is unchanged.
    Rejected { occupant: CandidateId },
    /// Carried the invalid sentinel and never touched the map.
    Invalid,
}

impl Placement {
    /// Whether the candidate now occupies a cell.
    pub fn accepted(&self) -> bool {
        matches!(self, Placement::Inserted | Placement::Improved { .. })
    }
}

/// Best candidate per behavioral cell.
#[derive(Debug)]
pub struct FeatureMap {
    encoder: Arc<FeatureEncoder>,
    arena: Arc<CandidateArena>,
    rejected: Arc<RejectedArchive>,
    cells: RwLock<HashMap<FeatureVector, Cell>>,
    filled: AtomicU64,
    added: AtomicU64,
    improved: AtomicU64,
    rejections: AtomicU64,
}

impl FeatureMap {
    /// Create an empty map over the encoder's dimensions.
    pub fn new(
        encoder: Arc<FeatureEncoder>,
        arena: Arc<CandidateArena>,
        rejected: Arc<RejectedArchive>,
    ) -> Self {
        Self {
            encoder,
            arena,
            rejected,
            cells: RwLock::new(HashMap::new()),
            filled: AtomicU64::new(0),
            added: AtomicU64::new(0),
            improved: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Offer a candidate; `true` if it now occupies its cell.
    pub fn add(&self, candidate: &Candidate) -> Result<bool, DimensionError> {
        Ok(self.insert(candidate)?.accepted())
    }

    /// Offer a candidate and report what happened.
    ///
    /// The candidate must already live in the arena. Its status is updated,
    /// along with any displaced occupant, while the cell is held.
    pub fn insert(&self, candidate: &Candidate) -> Result<Placement, DimensionError> {
        let Some(vector) = candidate.cell() else {
            self.reject(candidate.id);
            debug!("Candidate {} is invalid, archived without placement", candidate.id);
            return Ok(Placement::Invalid);
        };
        self.encoder.check(vector)?;

        let cell = self.cell(vector);
        let mut slot = cell.lock();
        let current = *slot;

        let placement = match current {
            None => {
                *slot = Some(Occupant {
                    id: candidate.id,
                    score: candidate.score,
                });
                self.arena.set_status(candidate.id, CandidateStatus::Elite);
                self.filled.fetch_add(1, Ordering::Relaxed);
                self.added.fetch_add(1, Ordering::Relaxed);
                debug!("Added candidate {} to cell {}", candidate.id, vector);
                Placement::Inserted
            }
            Some(occupant) if candidate.score > occupant.score => {
                *slot = Some(Occupant {
                    id: candidate.id,
                    score: candidate.score,
                });
                self.arena.set_status(candidate.id, CandidateStatus::Elite);
                self.arena.set_status(occupant.id, CandidateStatus::Displaced);
                self.rejected.push(occupant.id);
                self.improved.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Replaced candidate in cell {}: {:.3} -> {:.3}",
                    vector, occupant.score, candidate.score
                );
                Placement::Improved {
                    displaced: occupant.id,
                }
            }
            Some(occupant) => {
                self.reject(candidate.id);
                debug!(
                    "Rejected candidate {} (score: {:.3}, occupant: {:.3})",
                    candidate.id, candidate.score, occupant.score
                );
                Placement::Rejected {
                    occupant: occupant.id,
                }
            }
        };

        Ok(placement)
    }

    fn reject(&self, id: CandidateId) {
        self.arena.set_status(id, CandidateStatus::Rejected);
        self.rejected.push(id);
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Cell handle for `vector`, created empty on first use.
    fn cell(&self, vector: &FeatureVector) -> Cell {
        if let Some(cell) = self.cells.read().get(vector) {
            return Arc::clone(cell);
        }
        let mut cells = self.cells.write();
        Arc::clone(cells.entry(vector.clone()).or_default())
    }

    /// Id of the elite in `vector`'s cell.
    pub fn occupant(&self, vector: &FeatureVector) -> Option<CandidateId> {
        let cell = self.cells.read().get(vector).map(Arc::clone)?;
        let slot = cell.lock();
        slot.map(|occupant| occupant.id)
    }

    /// Elite in `vector`'s cell.
    pub fn get(&self, vector: &FeatureVector) -> Option<Arc<Candidate>> {
        self.occupant(vector).and_then(|id| self.arena.get(id))
    }

    /// Occupied cells and their elites, ordered by coordinates.
    pub fn entries(&self) -> Vec<(FeatureVector, CandidateId, f64)> {
        let cells: Vec<(FeatureVector, Cell)> = self
            .cells
            .read()
            .iter()
            .map(|(vector, cell)| (vector.clone(), Arc::clone(cell)))
            .collect();

        let mut entries: Vec<_> = cells
            .into_iter()
            .filter_map(|(vector, cell)| {
                let slot = cell.lock();
                slot.map(|occupant| (vector, occupant.id, occupant.score))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// All current elites.
    pub fn all(&self) -> Vec<Arc<Candidate>> {
        let ids: Vec<CandidateId> = self.entries().into_iter().map(|(_, id, _)| id).collect();
        self.arena.resolve(&ids)
    }

    pub fn filled_cells(&self) -> u64 {
        self.filled.load(Ordering::Relaxed)
    }

    pub fn total_cells(&self) -> u64 {
        self.encoder.total_cells()
    }

    /// Fraction of cells holding an elite, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        let total = self.total_cells();
        if total == 0 {
            return 0.0;
        }
        self.filled_cells() as f64 / total as f64
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Occupancy counters and elite score distribution.
    pub fn statistics(&self) -> ArchiveStatistics {
        let scores: Vec<f64> = self
            .entries()
            .into_iter()
            .map(|(_, _, score)| score)
            .collect();

        ArchiveStatistics {
            filled_cells: self.filled_cells(),
            total_cells: self.total_cells(),
            coverage: self.coverage(),
            added: self.added.load(Ordering::Relaxed),
            improved: self.improved.load(Ordering::Relaxed),
            rejected: self.rejections.load(Ordering::Relaxed),
            scores: ScoreSummary::from_scores(&scores),
        }
    }

    /// Counters as `(added, improved, rejected)`.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.added.load(Ordering::Relaxed),
            self.improved.load(Ordering::Relaxed),
            self.rejections.load(Ordering::Relaxed),
        )
    }

    /// Place a restored elite without comparison or side effects.
    pub(crate) fn restore_cell(
        &self,
        vector: FeatureVector,
        id: CandidateId,
        score: f64,
    ) -> Result<(), DimensionError> {
        self.encoder.check(&vector)?;
        let previous = self
            .cells
            .write()
            .insert(vector, Arc::new(Mutex::new(Some(Occupant { id, score }))));
        if previous.is_none() {
            self.filled.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    pub(crate) fn restore_counters(&self, added: u64, improved: u64, rejected: u64) {
        self.added.store(added, Ordering::Relaxed);
        self.improved.store(improved, Ordering::Relaxed);
        self.rejections.store(rejected, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FeatureDimension, FeatureKey};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};

    struct Fixture {
        arena: Arc<CandidateArena>,
        rejected: Arc<RejectedArchive>,
        map: FeatureMap,
    }

    /// Three continuous dims with 4 bins on [0, 1] plus a 2-bit categorical dim.
    fn fixture() -> Fixture {
        let encoder = Arc::new(FeatureEncoder::new(vec![
            FeatureDimension::continuous("a", 0.0, 1.0, 4),
            FeatureDimension::continuous("b", 0.0, 1.0, 4),
            FeatureDimension::continuous("c", 0.0, 1.0, 4),
            FeatureDimension::categorical("style", ["trend", "reversion"]),
        ]));
        let arena = Arc::new(CandidateArena::new());
        let rejected = Arc::new(RejectedArchive::new());
        let map = FeatureMap::new(encoder, Arc::clone(&arena), Arc::clone(&rejected));
        Fixture {
            arena,
            rejected,
            map,
        }
    }

    fn candidate(fixture: &Fixture, features: FeatureKey, score: f64) -> Arc<Candidate> {
        fixture.arena.insert(|id| Candidate {
            id,
            generation: 0,
            island: 0,
            hypothesis: format!("hypothesis {}", id.0),
            code: String::new(),
            analysis: String::new(),
            metrics: BTreeMap::new(),
            tags: BTreeSet::new(),
            score,
            features,
            parent: None,
            lineage: None,
        })
    }

    fn cell(bins: [u32; 4]) -> FeatureKey {
        FeatureKey::Cell(bins.into())
    }

    #[test]
    fn test_elitism_scenario() {
        let f = fixture();
        let vector = FeatureVector::from([2, 2, 2, 1]);

        let a = candidate(&f, cell([2, 2, 2, 1]), 1.0);
        assert!(f.map.add(&a).unwrap());

        let b = candidate(&f, cell([2, 2, 2, 1]), 0.5);
        assert!(!f.map.add(&b).unwrap());
        assert_eq!(f.map.occupant(&vector), Some(a.id));
        assert_eq!(f.map.get(&vector).unwrap().score, 1.0);
        assert_eq!(f.arena.status(b.id), Some(CandidateStatus::Rejected));

        let c = candidate(&f, cell([2, 2, 2, 1]), 1.5);
        assert!(f.map.add(&c).unwrap());
        assert_eq!(f.map.occupant(&vector), Some(c.id));
        assert!(f.rejected.contains(a.id));
        assert_eq!(f.arena.status(a.id), Some(CandidateStatus::Displaced));
        assert_eq!(f.arena.status(c.id), Some(CandidateStatus::Elite));
        assert_eq!(f.map.filled_cells(), 1);
    }

    #[test]
    fn test_equal_score_does_not_replace() {
        let f = fixture();
        let first = candidate(&f, cell([0, 0, 0, 0]), 1.0);
        let second = candidate(&f, cell([0, 0, 0, 0]), 1.0);
        assert_eq!(f.map.insert(&first).unwrap(), Placement::Inserted);
        assert_eq!(
            f.map.insert(&second).unwrap(),
            Placement::Rejected { occupant: first.id }
        );
    }

    #[test]
    fn test_invalid_goes_straight_to_rejected() {
        let f = fixture();
        let bad = candidate(&f, FeatureKey::Invalid, 100.0);
        assert_eq!(f.map.insert(&bad).unwrap(), Placement::Invalid);
        assert_eq!(f.map.filled_cells(), 0);
        assert!(f.rejected.contains(bad.id));
        assert_eq!(f.arena.status(bad.id), Some(CandidateStatus::Rejected));
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let f = fixture();
        let short = candidate(&f, FeatureKey::Cell([1, 1].into()), 1.0);
        assert!(matches!(
            f.map.add(&short),
            Err(DimensionError::ArityMismatch { .. })
        ));
        let wide = candidate(&f, cell([0, 0, 0, 4]), 1.0);
        assert!(matches!(
            f.map.add(&wide),
            Err(DimensionError::BinOutOfRange { .. })
        ));
        assert_eq!(f.map.filled_cells(), 0);
    }

    #[test]
    fn test_statistics() {
        let f = fixture();
        f.map.add(&candidate(&f, cell([0, 0, 0, 0]), 1.0)).unwrap();
        f.map.add(&candidate(&f, cell([1, 0, 0, 0]), 3.0)).unwrap();
        f.map.add(&candidate(&f, cell([1, 0, 0, 0]), 2.0)).unwrap();

        let stats = f.map.statistics();
        assert_eq!(stats.filled_cells, 2);
        assert_eq!(stats.total_cells, 4 * 4 * 4 * 4);
        assert!((stats.coverage - 2.0 / 256.0).abs() < 1e-12);
        assert_eq!(stats.added, 2);
        assert_eq!(stats.rejected, 1);
        let scores = stats.scores.unwrap();
        assert_eq!(scores.min, 1.0);
        assert_eq!(scores.max, 3.0);
        assert_eq!(f.map.all().len(), 2);
    }

    #[test]
    fn test_concurrent_adds_to_one_cell_keep_best() {
        use rayon::prelude::*;

        let f = fixture();
        let candidates: Vec<_> = (0..200)
            .map(|i| candidate(&f, cell([3, 3, 3, 3]), (i * 37 % 200) as f64))
            .collect();

        candidates.par_iter().for_each(|c| {
            f.map.add(c).unwrap();
        });

        let best = f.map.get(&FeatureVector::from([3, 3, 3, 3])).unwrap();
        assert_eq!(best.score, 199.0);
        assert_eq!(f.map.filled_cells(), 1);
        let elites = candidates
            .iter()
            .filter(|c| f.arena.status(c.id) == Some(CandidateStatus::Elite))
            .count();
        assert_eq!(elites, 1);
        assert_eq!(f.rejected.len(), 199);
    }

    proptest! {
        #[test]
        fn prop_cells_only_improve(
            inserts in prop::collection::vec((0u32..2, 0u32..2, -10.0f64..10.0), 1..60)
        ) {
            let f = fixture();
            let mut best: HashMap<FeatureVector, f64> = HashMap::new();
            let mut last_coverage = 0.0;

            for (x, y, score) in inserts {
                let vector = FeatureVector::from([x, y, 0, 0]);
                let before = f.map.occupant(&vector);
                let c = candidate(&f, FeatureKey::Cell(vector.clone()), score);
                let accepted = f.map.add(&c).unwrap();

                let expected = best.get(&vector).is_none_or(|b| score > *b);
                prop_assert_eq!(accepted, expected);
                if accepted {
                    best.insert(vector.clone(), score);
                } else {
                    prop_assert_eq!(f.map.occupant(&vector), before);
                }
                prop_assert_eq!(f.map.get(&vector).unwrap().score, best[&vector]);

                let coverage = f.map.coverage();
                prop_assert!((0.0..=1.0).contains(&coverage));
                prop_assert!(coverage >= last_coverage);
                last_coverage = coverage;
            }

            // Every archived (displaced or rejected) candidate scores no higher
            // than the elite of its cell.
            for id in f.rejected.ids() {
                let c = f.arena.get(id).unwrap();
                let elite = f.map.get(c.cell().unwrap()).unwrap();
                prop_assert!(c.score <= elite.score);
            }
        }
    }
}
