//! The evolutionary database: islands, the shared feature map and the
//! insight repository behind one facade.
//!
//! Per-island work (`ingest`, sampling) takes `&self` and may run in parallel.
//! Migration, curation and checkpointing take `&mut self`, so no island work
//! can be in flight while they run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::schema::{
    CHECKPOINT_VERSION, Candidate, CandidateId, CandidateRecord, CandidateStatus,
    CandidateSubmission, CellRecord, Checkpoint, CheckpointCounters, ConfigError, CousinCounts,
    DatabaseConfig, DatabaseStatistics, FeatureKey, Insight, IslandId, IslandRecord,
    IslandStatistics, ScoreSummary, Validity, combined_score,
};

use super::arena::{CandidateArena, RejectedArchive};
use super::encoder::{DimensionError, FeatureEncoder};
use super::feature_map::{FeatureMap, Placement};
use super::generator::{CandidateGenerator, GenerationRequest};
use super::insights::{CurationReport, InsightRepository};
use super::island::Island;
use super::sampling::{Cousins, EvolutionRng, SamplingEngine};

/// File written by [`EvolutionaryDatabase::save`] inside the target directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    #[error("Unknown island {island} (database has {count})")]
    UnknownIsland { island: IslandId, count: usize },
    #[error("Expected {expected} seeds (one per category plus the benchmark), got {found}")]
    SeedCount { expected: usize, found: usize },
    #[error("Database is already initialized")]
    AlreadyInitialized,
    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed checkpoint: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Inconsistent checkpoint: {0}")]
    Restore(String),
}

/// Result of ingesting one submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestOutcome {
    pub id: CandidateId,
    pub island: IslandId,
    pub score: f64,
    pub placement: Placement,
}

impl IngestOutcome {
    /// Whether the candidate now occupies a feature map cell.
    pub fn accepted(&self) -> bool {
        self.placement.accepted()
    }
}

/// Result of a migration barrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub generation: u64,
    /// Copies created.
    pub migrants: usize,
    /// Copies that won a feature map cell.
    pub accepted: usize,
}

/// One island's share of a generation.
#[derive(Debug, Clone)]
pub struct IslandStep {
    pub island: IslandId,
    pub parent: Option<CandidateId>,
    pub cousins: usize,
    /// `None` if no parent was available or the generator skipped the island.
    pub outcome: Option<IngestOutcome>,
}

/// Summary of [`EvolutionaryDatabase::evolve_generation`].
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub generation: u64,
    pub steps: Vec<IslandStep>,
    pub migration: Option<MigrationReport>,
    pub curation: Option<CurationReport>,
}

/// Island-model quality-diversity archive.
#[derive(Debug)]
pub struct EvolutionaryDatabase {
    config: DatabaseConfig,
    arena: Arc<CandidateArena>,
    rejected: Arc<RejectedArchive>,
    map: FeatureMap,
    islands: Vec<Island>,
    insights: InsightRepository,
    rng: Mutex<EvolutionRng>,
    generation: u64,
    initialized: bool,
    neighbor_misses: AtomicU64,
    validation_rejections: AtomicU64,
}

impl EvolutionaryDatabase {
    /// Create an empty database with one island per category plus the
    /// benchmark island.
    pub fn new(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        config.validate()?;
        let rng = config
            .random_seed
            .map(EvolutionRng::new)
            .unwrap_or_else(EvolutionRng::random);
        Ok(Self::build(config, rng))
    }

    fn build(config: DatabaseConfig, rng: EvolutionRng) -> Self {
        let encoder = Arc::new(FeatureEncoder::new(config.dimensions.clone()));
        let arena = Arc::new(CandidateArena::new());
        let rejected = Arc::new(RejectedArchive::new());
        let map = FeatureMap::new(encoder, Arc::clone(&arena), Arc::clone(&rejected));
        let islands = config
            .island_labels()
            .into_iter()
            .enumerate()
            .map(|(id, label)| Island::new(id, label))
            .collect();

        Self {
            config,
            arena,
            rejected,
            map,
            islands,
            insights: InsightRepository::new(),
            rng: Mutex::new(rng),
            generation: 0,
            initialized: false,
            neighbor_misses: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn island(&self, id: IslandId) -> Result<&Island, DatabaseError> {
        self.islands.get(id).ok_or(DatabaseError::UnknownIsland {
            island: id,
            count: self.islands.len(),
        })
    }

    pub fn feature_map(&self) -> &FeatureMap {
        &self.map
    }

    pub fn arena(&self) -> &CandidateArena {
        &self.arena
    }

    pub fn rejected(&self) -> &RejectedArchive {
        &self.rejected
    }

    pub fn candidate(&self, id: CandidateId) -> Option<Arc<Candidate>> {
        self.arena.get(id)
    }

    pub fn status(&self, id: CandidateId) -> Option<CandidateStatus> {
        self.arena.status(id)
    }

    /// Seed every island, in island order: categories first, benchmark last.
    pub fn initialize(
        &mut self,
        seeds: Vec<CandidateSubmission>,
    ) -> Result<Vec<IngestOutcome>, DatabaseError> {
        if self.initialized {
            return Err(DatabaseError::AlreadyInitialized);
        }
        if seeds.len() != self.islands.len() {
            return Err(DatabaseError::SeedCount {
                expected: self.islands.len(),
                found: seeds.len(),
            });
        }

        let outcomes = seeds
            .into_iter()
            .enumerate()
            .map(|(island, mut seed)| {
                seed.island = island;
                seed.generation = self.generation;
                self.ingest(seed)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.initialized = true;
        info!(
            "Initialized {} islands with seed strategies ({} on the map)",
            self.islands.len(),
            self.map.filled_cells()
        );
        Ok(outcomes)
    }

    /// Store a submission, record it on its island and offer it to the map.
    ///
    /// Submissions flagged invalid, carrying NaN/Inf metrics, or whose
    /// combined score overflows are archived as rejected without touching the
    /// map; an overflowed score is stored as zero. A precomputed feature vector that
    /// does not fit the configured dimensions is an error and nothing is
    /// stored.
    pub fn ingest(&self, submission: CandidateSubmission) -> Result<IngestOutcome, DatabaseError> {
        let island = self.island(submission.island)?;

        let CandidateSubmission {
            hypothesis,
            code,
            analysis,
            mut metrics,
            tags,
            generation,
            island: island_id,
            parent,
            validity,
            score,
            features,
            insights,
        } = submission;

        let before = metrics.len();
        metrics.retain(|_, value| value.is_finite());
        let dropped = before - metrics.len();

        let score = score
            .filter(|s| s.is_finite())
            .unwrap_or_else(|| combined_score(&metrics));

        let invalid_reason = if validity == Validity::Invalid {
            Some("flagged invalid by the evaluator".to_string())
        } else if dropped > 0 {
            Some(format!("{dropped} non-finite metric(s)"))
        } else if !score.is_finite() {
            Some("combined score overflowed".to_string())
        } else {
            None
        };
        // Non-finite scores cannot be written to a checkpoint.
        let score = if score.is_finite() { score } else { 0.0 };

        let features = match (&invalid_reason, features) {
            (Some(_), _) => FeatureKey::Invalid,
            (None, Some(vector)) => {
                self.map.encoder().check(&vector)?;
                FeatureKey::Cell(vector)
            }
            (None, None) => self.map.encoder().encode(&metrics, &tags),
        };
        let candidate = self.arena.insert(|id| Candidate {
            id,
            generation,
            island: island_id,
            hypothesis,
            code,
            analysis,
            metrics,
            tags,
            score,
            features,
            parent,
            lineage: None,
        });
        island.record(candidate.id);

        if let Some(reason) = &invalid_reason {
            self.validation_rejections.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Candidate {} on island {} failed validation: {}",
                candidate.id, island_id, reason
            );
        }
        let placement = self.map.insert(&candidate)?;

        for text in insights {
            self.insights.push(
                Insight::new(text, self.generation)
                    .from_island(island_id)
                    .from_candidate(candidate.id, score),
            );
        }

        Ok(IngestOutcome {
            id: candidate.id,
            island: island_id,
            score,
            placement,
        })
    }

    fn engine(&self) -> SamplingEngine<'_> {
        SamplingEngine::new(&self.arena, &self.map, &self.config.sampling)
    }

    /// Draw a parent from `island`; see [`SamplingEngine::sample_parent`].
    ///
    /// `alpha` must lie in `[0, 1]`.
    pub fn sample_parent(
        &self,
        island: IslandId,
        alpha: f64,
    ) -> Result<Option<Arc<Candidate>>, DatabaseError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::InvalidAlpha(alpha).into());
        }
        let island = self.island(island)?;
        let mut rng = self.rng.lock();
        Ok(self.engine().sample_parent(island, alpha, &mut rng))
    }

    /// Collect cousins for `parent`; see [`SamplingEngine::sample_cousins`].
    pub fn sample_cousins(
        &self,
        parent: &Candidate,
        island: IslandId,
        counts: CousinCounts,
    ) -> Result<Cousins, DatabaseError> {
        let island = self.island(island)?;
        let mut rng = self.rng.lock();
        let cousins = self.engine().sample_cousins(parent, island, counts, &mut rng);
        self.neighbor_misses
            .fetch_add(cousins.neighbor_misses, Ordering::Relaxed);
        Ok(cousins)
    }

    /// File an insight, stamped with the current generation.
    pub fn add_insight(&self, mut insight: Insight) {
        insight.generation = self.generation;
        self.insights.push(insight);
    }

    /// The `n` most recent insights, oldest first.
    pub fn recent_insights(&self, n: usize) -> Vec<Insight> {
        self.insights.recent(n)
    }

    pub fn insights_for_island(&self, island: IslandId) -> Vec<Insight> {
        self.insights.for_island(island)
    }

    pub fn insights(&self) -> &InsightRepository {
        &self.insights
    }

    /// Move to the next generation and return its number.
    pub fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn migration_due(&self) -> bool {
        self.generation > 0 && self.generation % self.config.migration.interval == 0
    }

    pub fn curation_due(&self) -> bool {
        self.generation > 0 && self.generation % self.config.insights.curation_interval == 0
    }

    /// Copy each island's top `migrants` elites into a randomly chosen
    /// different island.
    ///
    /// Copies get fresh ids and the current generation, keep the original's
    /// payload, score and cell, and record their origin. Origin islands keep
    /// their members.
    pub fn migrate(&mut self, migrants: usize) -> Result<MigrationReport, DatabaseError> {
        let generation = self.generation;
        let count = self.islands.len();
        if count < 2 || migrants == 0 {
            return Ok(MigrationReport {
                generation,
                ..Default::default()
            });
        }

        let rng = self.rng.get_mut();
        let mut plan: Vec<(Arc<Candidate>, IslandId)> = Vec::new();
        for island in &self.islands {
            for elite in island.ranked_elites(&self.arena).into_iter().take(migrants) {
                let mut destination = rng.index(count - 1);
                if destination >= island.id() {
                    destination += 1;
                }
                plan.push((elite, destination));
            }
        }

        let this = &*self;
        let placements = plan
            .par_iter()
            .map(|(source, destination)| this.admit_migrant(source, *destination, generation))
            .collect::<Result<Vec<_>, _>>()?;

        let report = MigrationReport {
            generation,
            migrants: placements.len(),
            accepted: placements.iter().filter(|p| p.accepted()).count(),
        };
        info!(
            "Migrated {} elites between {} islands at generation {} ({} accepted)",
            report.migrants, count, generation, report.accepted
        );
        Ok(report)
    }

    fn admit_migrant(
        &self,
        source: &Candidate,
        destination: IslandId,
        generation: u64,
    ) -> Result<Placement, DatabaseError> {
        let copy = self
            .arena
            .insert(|id| source.migrated_copy(id, destination, generation));
        self.islands[destination].record(copy.id);
        debug!(
            "Migrated {} from island {} to island {} as {}",
            source.id, source.island, destination, copy.id
        );
        Ok(self.map.insert(&copy)?)
    }

    /// Rescore and prune the insight repository.
    pub fn curate_insights(&mut self) -> CurationReport {
        self.insights.curate(&self.config.insights, self.generation)
    }

    /// Run the migration and curation barriers that are due this generation.
    pub fn run_barriers(
        &mut self,
    ) -> Result<(Option<MigrationReport>, Option<CurationReport>), DatabaseError> {
        let migration = if self.migration_due() {
            Some(self.migrate(self.config.migration.migrants)?)
        } else {
            None
        };
        let curation = self.curation_due().then(|| self.curate_insights());
        Ok((migration, curation))
    }

    /// Advance one generation: every island samples a parent and cousins and
    /// asks `generator` for a new candidate, in parallel; then the due
    /// barriers run.
    pub fn evolve_generation<G>(&mut self, generator: &G) -> Result<GenerationReport, DatabaseError>
    where
        G: CandidateGenerator + ?Sized,
    {
        let generation = self.advance_generation();
        info!("Generation {generation}");

        let mut rngs: Vec<EvolutionRng> = {
            let rng = self.rng.get_mut();
            (0..self.islands.len()).map(|_| rng.fork()).collect()
        };

        let this = &*self;
        let steps = this
            .islands
            .par_iter()
            .zip(rngs.par_iter_mut())
            .map(|(island, rng)| this.step_island(island, generation, generator, rng))
            .collect::<Result<Vec<_>, _>>()?;

        let (migration, curation) = self.run_barriers()?;
        Ok(GenerationReport {
            generation,
            steps,
            migration,
            curation,
        })
    }

    fn step_island<G>(
        &self,
        island: &Island,
        generation: u64,
        generator: &G,
        rng: &mut EvolutionRng,
    ) -> Result<IslandStep, DatabaseError>
    where
        G: CandidateGenerator + ?Sized,
    {
        let engine = self.engine();
        let Some(parent) = engine.sample_parent(island, self.config.sampling.alpha, rng) else {
            warn!("No parent available for island {}", island.id());
            return Ok(IslandStep {
                island: island.id(),
                parent: None,
                cousins: 0,
                outcome: None,
            });
        };

        let cousins = engine.sample_cousins(&parent, island, self.config.sampling.cousins, rng);
        self.neighbor_misses
            .fetch_add(cousins.neighbor_misses, Ordering::Relaxed);

        let request = GenerationRequest {
            island: island.id(),
            category: island.category().to_string(),
            generation,
            parent: Arc::clone(&parent),
            cousins,
            insights: self.insights.recent(self.config.insights.recent_window),
        };

        let outcome = match generator.generate(&request) {
            Some(mut submission) => {
                submission.island = island.id();
                submission.generation = generation;
                submission.parent = submission.parent.or(Some(parent.id));
                let outcome = self.ingest(submission)?;
                debug!(
                    "Island {} produced {} (score: {:.3}, accepted: {})",
                    island.id(),
                    outcome.id,
                    outcome.score,
                    outcome.accepted()
                );
                Some(outcome)
            }
            None => None,
        };

        Ok(IslandStep {
            island: island.id(),
            parent: Some(parent.id),
            cousins: request.cousins.len(),
            outcome,
        })
    }

    /// Best elite across the whole database.
    pub fn best(&self) -> Option<Arc<Candidate>> {
        self.map
            .all()
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score).then(b.id.cmp(&a.id)))
    }

    pub fn statistics(&self) -> DatabaseStatistics {
        let islands = self
            .islands
            .iter()
            .map(|island| {
                let elites = island.elites(&self.arena);
                let scores: Vec<f64> = elites.iter().map(|c| c.score).collect();
                let best = elites
                    .iter()
                    .max_by(|a, b| a.score.total_cmp(&b.score));
                IslandStatistics {
                    id: island.id(),
                    category: island.category().to_string(),
                    population: island.len(),
                    elites: elites.len(),
                    mean_score: ScoreSummary::from_scores(&scores).map(|s| s.mean),
                    max_score: best.map(|c| c.score),
                    best: best.map(|c| c.id),
                }
            })
            .collect();

        DatabaseStatistics {
            generation: self.generation,
            islands,
            archive: self.map.statistics(),
            total_candidates: self.arena.len(),
            total_elites: self.map.filled_cells() as usize,
            rejected: self.rejected.len(),
            insights: self.insights.len(),
            neighbor_misses: self.neighbor_misses.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the full database state.
    ///
    /// Takes `&mut self` so no ingest can interleave with the snapshot. The
    /// random stream is reseeded and the new seed recorded, so this database
    /// and one restored from the checkpoint draw the same numbers from here on.
    pub fn checkpoint(&mut self) -> Checkpoint {
        let rng_seed = self.rng.get_mut().reseed();
        let candidates = self
            .arena
            .snapshot()
            .into_iter()
            .map(|(candidate, status)| CandidateRecord {
                candidate: (*candidate).clone(),
                status,
            })
            .collect();
        let islands = self
            .islands
            .iter()
            .map(|island| IslandRecord {
                id: island.id(),
                category: island.category().to_string(),
                population: island.population(),
            })
            .collect();
        let cells = self
            .map
            .entries()
            .into_iter()
            .map(|(features, occupant, _)| CellRecord { features, occupant })
            .collect();
        let (added, improved, rejected) = self.map.counters();

        Checkpoint {
            version: CHECKPOINT_VERSION,
            generation: self.generation,
            config: self.config.clone(),
            candidates,
            islands,
            cells,
            rejected: self.rejected.ids(),
            insights: self.insights.snapshot(),
            rng_seed: Some(rng_seed),
            counters: CheckpointCounters {
                added,
                improved,
                rejected,
                neighbor_misses: self.neighbor_misses.load(Ordering::Relaxed),
                validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            },
        }
    }

    /// Rebuild a database from a checkpoint, checking its consistency.
    ///
    /// The random stream resumes from the recorded seed. Checkpoints without
    /// one fall back to the configured seed, or to entropy.
    pub fn restore(checkpoint: Checkpoint) -> Result<Self, DatabaseError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(DatabaseError::Restore(format!(
                "unsupported version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        checkpoint.config.validate()?;

        let rng = checkpoint
            .rng_seed
            .or(checkpoint.config.random_seed)
            .map(EvolutionRng::new)
            .unwrap_or_else(EvolutionRng::random);
        let mut db = Self::build(checkpoint.config, rng);
        db.generation = checkpoint.generation;

        for record in checkpoint.candidates {
            let id = record.candidate.id;
            if !db.arena.restore(record.candidate, record.status) {
                return Err(DatabaseError::Restore(format!(
                    "candidate {id} is out of sequence"
                )));
            }
        }
        let known = |id: CandidateId| id.0 < db.arena.len() as u64;

        if checkpoint.islands.len() != db.islands.len() {
            return Err(DatabaseError::Restore(format!(
                "{} islands recorded, configuration defines {}",
                checkpoint.islands.len(),
                db.islands.len()
            )));
        }
        let mut islands = Vec::with_capacity(checkpoint.islands.len());
        for (index, record) in checkpoint.islands.into_iter().enumerate() {
            if record.id != index {
                return Err(DatabaseError::Restore(format!(
                    "island {} recorded at position {index}",
                    record.id
                )));
            }
            if let Some(id) = record.population.iter().find(|id| !known(**id)) {
                return Err(DatabaseError::Restore(format!(
                    "island {index} references unknown candidate {id}"
                )));
            }
            islands.push(Island::with_population(
                record.id,
                record.category,
                record.population,
            ));
        }

        for cell in checkpoint.cells {
            let occupant = db.arena.get(cell.occupant).ok_or_else(|| {
                DatabaseError::Restore(format!(
                    "cell {} references unknown candidate {}",
                    cell.features, cell.occupant
                ))
            })?;
            if occupant.cell() != Some(&cell.features) {
                return Err(DatabaseError::Restore(format!(
                    "candidate {} does not belong to cell {}",
                    occupant.id, cell.features
                )));
            }
            db.map
                .restore_cell(cell.features, occupant.id, occupant.score)?;
        }

        for id in checkpoint.rejected {
            if !known(id) {
                return Err(DatabaseError::Restore(format!(
                    "rejected archive references unknown candidate {id}"
                )));
            }
            db.rejected.push(id);
        }

        let counters = checkpoint.counters;
        db.map
            .restore_counters(counters.added, counters.improved, counters.rejected);
        db.neighbor_misses = AtomicU64::new(counters.neighbor_misses);
        db.validation_rejections = AtomicU64::new(counters.validation_rejections);
        db.islands = islands;
        db.insights = InsightRepository::from_insights(checkpoint.insights);
        db.initialized = !db.arena.is_empty();

        info!(
            "Restored database at generation {} ({} candidates, {} cells)",
            db.generation,
            db.arena.len(),
            db.map.filled_cells()
        );
        Ok(db)
    }

    /// Write a checkpoint into `directory`, creating it if needed.
    pub fn save<P: AsRef<Path>>(&mut self, directory: P) -> Result<PathBuf, DatabaseError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let path = directory.join(CHECKPOINT_FILE);
        let json = serde_json::to_string_pretty(&self.checkpoint())?;
        fs::write(&path, json)?;
        info!("Saved database to {}", path.display());
        Ok(path)
    }

    /// Load a database saved with [`EvolutionaryDatabase::save`].
    pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self, DatabaseError> {
        let path = directory.as_ref().join(CHECKPOINT_FILE);
        Self::load_file(&path)
    }

    /// Load a database from a checkpoint file.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        info!("Loading database from {}", path.display());
        Self::restore(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        FeatureDimension, FeatureVector, INFORMATION_RATIO, MAX_DRAWDOWN, SHARPE_RATIO,
    };
    use tempfile::tempdir;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            dimensions: vec![
                FeatureDimension::continuous(SHARPE_RATIO, -1.0, 3.0, 4),
                FeatureDimension::continuous(MAX_DRAWDOWN, -1.0, 0.0, 4),
                FeatureDimension::categorical("style", ["Momentum", "Mean-Reversion"]),
            ],
            categories: vec!["Momentum".to_string(), "Mean-Reversion".to_string()],
            random_seed: Some(42),
            ..Default::default()
        }
    }

    fn strategy(sharpe: f64, drawdown: f64, tag: &str) -> CandidateSubmission {
        CandidateSubmission::new(format!("{tag} with sharpe {sharpe}"), "def run(): pass")
            .with_metric(SHARPE_RATIO, sharpe)
            .with_metric(MAX_DRAWDOWN, drawdown)
            .with_tag(tag)
    }

    fn seeded() -> EvolutionaryDatabase {
        let mut db = EvolutionaryDatabase::new(config()).unwrap();
        db.initialize(vec![
            strategy(0.5, -0.5, "Momentum"),
            strategy(0.2, -0.3, "Mean-Reversion"),
            strategy(0.1, -0.2, "benchmark"),
        ])
        .unwrap();
        db
    }

    #[test]
    fn test_initialize_requires_one_seed_per_island() {
        let mut db = EvolutionaryDatabase::new(config()).unwrap();
        assert_eq!(db.islands().len(), 3);
        assert!(matches!(
            db.initialize(vec![strategy(0.5, -0.5, "Momentum")]),
            Err(DatabaseError::SeedCount {
                expected: 3,
                found: 1
            })
        ));

        let outcomes = db
            .initialize(vec![
                strategy(0.5, -0.5, "Momentum"),
                strategy(0.2, -0.3, "Mean-Reversion"),
                strategy(0.1, -0.2, "benchmark"),
            ])
            .unwrap();
        assert!(outcomes.iter().all(IngestOutcome::accepted));
        assert_eq!(outcomes[2].island, 2);
        assert_eq!(db.island(2).unwrap().category(), "Buy-and-Hold Benchmark");
        assert!(matches!(
            db.initialize(Vec::new()),
            Err(DatabaseError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_ingest_scores_and_encodes() {
        let db = seeded();
        let outcome = db
            .ingest(
                strategy(1.5, -0.25, "Momentum")
                    .with_metric(INFORMATION_RATIO, 0.5)
                    .on_island(0),
            )
            .unwrap();
        assert!((outcome.score - 1.75).abs() < 1e-12);
        assert_eq!(outcome.placement, Placement::Inserted);

        let candidate = db.candidate(outcome.id).unwrap();
        assert_eq!(candidate.cell(), Some(&FeatureVector::from([2, 3, 1])));
        assert_eq!(db.status(outcome.id), Some(CandidateStatus::Elite));
        assert!(db.island(0).unwrap().population().contains(&outcome.id));
    }

    #[test]
    fn test_invalid_submissions_are_archived() {
        let db = seeded();
        let nan = db
            .ingest(strategy(f64::NAN, -0.1, "Momentum").with_score(100.0))
            .unwrap();
        let flagged = db.ingest(strategy(2.0, -0.1, "Momentum").invalid()).unwrap();

        for outcome in [nan, flagged] {
            assert_eq!(outcome.placement, Placement::Invalid);
            assert_eq!(db.status(outcome.id), Some(CandidateStatus::Rejected));
            assert!(db.rejected().contains(outcome.id));
        }
        let stored = db.candidate(nan.id).unwrap();
        assert!(stored.metrics.values().all(|v| v.is_finite()));
        assert_eq!(db.statistics().validation_rejections, 2);
        assert_eq!(db.feature_map().filled_cells(), 3);
    }

    #[test]
    fn test_overflowing_score_is_invalid() {
        let mut db = seeded();
        let outcome = db
            .ingest(
                strategy(1e308, -0.1, "Momentum")
                    .with_metric(INFORMATION_RATIO, 1e308)
                    .on_island(0),
            )
            .unwrap();

        assert_eq!(outcome.placement, Placement::Invalid);
        assert_eq!(outcome.score, 0.0);
        assert_eq!(db.status(outcome.id), Some(CandidateStatus::Rejected));
        assert_eq!(db.statistics().validation_rejections, 1);
        assert!(db.best().unwrap().score.is_finite());

        // The overflowed candidate must survive a checkpoint round trip.
        let dir = tempdir().unwrap();
        db.save(dir.path()).unwrap();
        let restored = EvolutionaryDatabase::load(dir.path()).unwrap();
        assert_eq!(restored.statistics(), db.statistics());
    }

    #[test]
    fn test_mismatched_features_are_fatal() {
        let db = seeded();
        let before = db.arena().len();
        let result = db.ingest(strategy(0.5, -0.5, "Momentum").with_features([1u32, 1]));
        assert!(matches!(
            result,
            Err(DatabaseError::Dimension(DimensionError::ArityMismatch { .. }))
        ));
        assert_eq!(db.arena().len(), before);
    }

    #[test]
    fn test_unknown_island() {
        let db = seeded();
        assert!(matches!(
            db.ingest(strategy(0.5, -0.5, "Momentum").on_island(9)),
            Err(DatabaseError::UnknownIsland { island: 9, count: 3 })
        ));
        assert!(db.sample_parent(3, 0.5).is_err());
    }

    #[test]
    fn test_sample_parent_rejects_bad_alpha() {
        let db = seeded();
        for alpha in [f64::NAN, f64::INFINITY, -0.1, 1.5] {
            assert!(matches!(
                db.sample_parent(0, alpha),
                Err(DatabaseError::Config(ConfigError::InvalidAlpha(_)))
            ));
        }
        assert!(db.sample_parent(0, 1.0).unwrap().is_some());
    }

    #[test]
    fn test_sampling_through_database() {
        let db = seeded();
        for i in 0..6 {
            db.ingest(strategy(i as f64 * 0.5 - 0.5, -0.5, "Momentum")).unwrap();
        }
        let parent = db.sample_parent(0, 1.0).unwrap().unwrap();
        assert_eq!(db.status(parent.id), Some(CandidateStatus::Elite));

        let cousins = db.sample_cousins(&parent, 0, CousinCounts::default()).unwrap();
        assert!(!cousins.contains(parent.id));
        assert!(cousins.len() <= 7);
        assert_eq!(db.statistics().neighbor_misses, cousins.neighbor_misses);
    }

    #[test]
    fn test_migration_keeps_origin_and_best() {
        let mut db = seeded();
        for i in 0..8 {
            let tag = if i % 2 == 0 { "Momentum" } else { "Mean-Reversion" };
            db.ingest(strategy(i as f64 * 0.4 - 1.0, -0.1 * i as f64, tag).on_island(i % 3))
                .unwrap();
        }
        let best_before = db.best().unwrap().score;
        let populations: Vec<usize> = db.islands().iter().map(Island::len).collect();
        let elites_before = db.feature_map().filled_cells();

        let report = db.migrate(5).unwrap();
        assert!(report.migrants > 0);
        assert_eq!(report.accepted, 0);
        assert_eq!(db.feature_map().filled_cells(), elites_before);
        assert!(db.best().unwrap().score >= best_before);

        let total: usize = db.islands().iter().map(Island::len).sum();
        assert_eq!(total, populations.iter().sum::<usize>() + report.migrants);

        for island in db.islands() {
            for candidate in db.arena().resolve(&island.population()) {
                if let Some(lineage) = candidate.lineage {
                    assert_ne!(lineage.origin_island, island.id());
                    assert_eq!(candidate.island, island.id());
                    assert_eq!(candidate.generation, db.generation());
                    let source = db.candidate(lineage.source).unwrap();
                    assert_eq!(source.score, candidate.score);
                    assert!(db.island(source.island).unwrap().population().contains(&source.id));
                }
            }
        }
    }

    #[test]
    fn test_evolve_generation_runs_barriers_when_due() {
        let mut config = config();
        config.migration.interval = 2;
        config.insights.curation_interval = 3;
        let mut db = EvolutionaryDatabase::new(config).unwrap();
        db.initialize(vec![
            strategy(0.5, -0.5, "Momentum"),
            strategy(0.2, -0.3, "Mean-Reversion"),
            strategy(0.1, -0.2, "benchmark"),
        ])
        .unwrap();

        let generator = |request: &GenerationRequest| {
            let sharpe = request.parent.score + 0.25 * (request.island as f64 + 1.0);
            Some(
                strategy(sharpe, -0.4, "Momentum")
                    .with_insight(format!("island {} should raise sharpe", request.island)),
            )
        };

        let first = db.evolve_generation(&generator).unwrap();
        assert_eq!(first.generation, 1);
        assert_eq!(first.steps.len(), 3);
        assert!(first.steps.iter().all(|s| s.outcome.is_some()));
        for step in &first.steps {
            let outcome = step.outcome.unwrap();
            let candidate = db.candidate(outcome.id).unwrap();
            assert_eq!(candidate.island, step.island);
            assert_eq!(candidate.parent, step.parent);
            assert_eq!(candidate.generation, 1);
        }
        assert!(first.migration.is_none() && first.curation.is_none());

        let second = db.evolve_generation(&generator).unwrap();
        assert!(second.migration.is_some());
        assert!(second.curation.is_none());

        let third = db.evolve_generation(&generator).unwrap();
        assert!(third.migration.is_none());
        let curation = third.curation.unwrap();
        assert_eq!(curation.before, 9);
        assert!(db.insights().len() <= 9);
        assert_eq!(db.generation(), 3);
    }

    #[test]
    fn test_generator_may_skip() {
        let mut db = seeded();
        let report = db
            .evolve_generation(&|_: &GenerationRequest| -> Option<CandidateSubmission> { None })
            .unwrap();
        assert!(report.steps.iter().all(|s| s.parent.is_some() && s.outcome.is_none()));
        assert_eq!(db.arena().len(), 3);
    }

    #[test]
    fn test_add_insight_stamps_generation() {
        let mut db = seeded();
        db.advance_generation();
        db.advance_generation();
        db.add_insight(Insight::new("use wider stops", 0).from_island(1));
        let recent = db.recent_insights(50);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].generation, 2);
        assert_eq!(db.insights_for_island(1).len(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let mut db = seeded();
        db.ingest(
            strategy(2.5, -0.1, "Momentum")
                .with_insight("trend filters help")
                .on_island(0),
        )
        .unwrap();
        db.ingest(strategy(0.3, -0.3, "Mean-Reversion").on_island(1))
            .unwrap();
        db.ingest(strategy(0.1, -0.3, "Mean-Reversion").on_island(1))
            .unwrap();

        let dir = tempdir().unwrap();
        let path = db.save(dir.path().join("run")).unwrap();
        assert!(path.exists());

        let restored = EvolutionaryDatabase::load(dir.path().join("run")).unwrap();
        assert_eq!(restored.statistics(), db.statistics());
        assert_eq!(restored.best().unwrap().id, db.best().unwrap().id);
        assert_eq!(restored.rejected().ids(), db.rejected().ids());
        assert_eq!(restored.recent_insights(10), db.recent_insights(10));
        for (a, b) in restored.islands().iter().zip(db.islands()) {
            assert_eq!(a.population(), b.population());
        }

        // New ids continue after the restored ones.
        let next = restored.ingest(strategy(0.0, 0.0, "Momentum")).unwrap();
        assert_eq!(next.id, CandidateId(db.arena().len() as u64));
    }

    #[test]
    fn test_restore_rejects_inconsistent_checkpoint() {
        let mut db = seeded();

        let mut dangling = db.checkpoint();
        dangling.cells[0].occupant = CandidateId(999);
        assert!(matches!(
            EvolutionaryDatabase::restore(dangling),
            Err(DatabaseError::Restore(_))
        ));

        let mut missing_island = db.checkpoint();
        missing_island.islands.pop();
        assert!(matches!(
            EvolutionaryDatabase::restore(missing_island),
            Err(DatabaseError::Restore(_))
        ));

        let mut version = db.checkpoint();
        version.version = CHECKPOINT_VERSION + 1;
        assert!(EvolutionaryDatabase::restore(version).is_err());
    }

    #[test]
    fn test_checkpoint_between_parallel_ingest_bursts() {
        let mut db = seeded();
        for round in 0..5 {
            (0..200).into_par_iter().for_each(|i| {
                let sharpe = -1.0 + 4.0 * (i as f64 / 200.0);
                let tag = if i % 2 == 0 { "Momentum" } else { "Mean-Reversion" };
                db.ingest(strategy(sharpe, -0.5, tag).on_island(i % 3)).unwrap();
            });

            let checkpoint = db.checkpoint();
            assert_eq!(checkpoint.candidates.len(), db.arena().len());
            let restored = EvolutionaryDatabase::restore(checkpoint)
                .unwrap_or_else(|e| panic!("round {round}: {e}"));
            assert_eq!(restored.statistics(), db.statistics());
        }
    }

    #[test]
    fn test_restored_sampling_continues_identically() {
        let mut db = seeded();
        for sharpe in [0.4, 1.1, 2.2] {
            db.ingest(strategy(sharpe, -0.4, "Momentum").on_island(0))
                .unwrap();
            db.ingest(strategy(sharpe, -0.8, "Mean-Reversion").on_island(1))
                .unwrap();
        }
        db.sample_parent(0, 0.5).unwrap();

        let restored = EvolutionaryDatabase::restore(db.checkpoint()).unwrap();
        for island in 0..3 {
            for _ in 0..10 {
                let a = db.sample_parent(island, 0.5).unwrap().unwrap();
                let b = restored.sample_parent(island, 0.5).unwrap().unwrap();
                assert_eq!(a.id, b.id);

                let ids = |c: Cousins| c.all().iter().map(|c| c.id).collect::<Vec<_>>();
                let counts = CousinCounts::default();
                assert_eq!(
                    ids(db.sample_cousins(&a, island, counts).unwrap()),
                    ids(restored.sample_cousins(&b, island, counts).unwrap())
                );
            }
        }
    }
}
