//! Parent and cousin sampling.
//!
//! A parent is drawn from an island's elites or its whole population; cousins
//! give the generator context: the island's best elites, feature-space
//! neighbors of the parent, and random population members.

use std::collections::HashSet;
use std::sync::Arc;

use rand::prelude::*;

use crate::schema::{
    Candidate, CandidateId, CousinCounts, DimensionKind, FeatureVector, SamplingConfig,
};

use super::arena::CandidateArena;
use super::feature_map::FeatureMap;
use super::island::Island;

/// Random number generator wrapper for sampling and migration.
#[derive(Debug, Clone)]
pub struct EvolutionRng {
    rng: StdRng,
}

impl EvolutionRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Derive an independent generator, e.g. one per island in a parallel step.
    pub fn fork(&mut self) -> Self {
        Self::new(self.rng.next_u64())
    }

    /// Replace the stream with a freshly seeded one and return the seed.
    pub fn reseed(&mut self) -> u64 {
        let seed = self.rng.next_u64();
        self.rng = StdRng::seed_from_u64(seed);
        seed
    }

    /// `true` with probability `p`. NaN counts as zero.
    pub fn chance(&mut self, p: f64) -> bool {
        if p.is_nan() {
            return false;
        }
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform index in `0..len`.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Up to `amount` distinct items, without replacement.
    pub fn pick_many<T: Clone>(&mut self, items: &[T], amount: usize) -> Vec<T> {
        items
            .choose_multiple(&mut self.rng, amount)
            .cloned()
            .collect()
    }

    /// `floor(Normal(bin, sigma))` clipped to `[0, bins - 1]`.
    pub fn perturb_bin(&mut self, bin: u32, sigma: f64, bins: u32) -> u32 {
        let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
        let top = bins.saturating_sub(1) as f64;
        (bin as f64 + sigma * noise).floor().clamp(0.0, top) as u32
    }

    /// Flip `flips` uniformly chosen bits of a `width`-bit value.
    ///
    /// Positions are drawn independently, so repeated flips may cancel.
    pub fn flip_bits(&mut self, value: u32, width: u32, flips: u32) -> u32 {
        if width == 0 {
            return value;
        }
        let mut value = value;
        for _ in 0..flips {
            value ^= 1u32 << self.rng.gen_range(0..width);
        }
        value
    }
}

/// Context candidates for one generation step.
#[derive(Debug, Clone, Default)]
pub struct Cousins {
    /// Top island elites by score.
    pub best: Vec<Arc<Candidate>>,
    /// Occupants of cells near the parent.
    pub diverse: Vec<Arc<Candidate>>,
    /// Uniform draws from the island population.
    pub random: Vec<Arc<Candidate>>,
    /// Empty cells hit while looking for diverse cousins.
    pub neighbor_misses: u64,
}

impl Cousins {
    pub fn len(&self) -> usize {
        self.best.len() + self.diverse.len() + self.random.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cousins: best, then diverse, then random.
    pub fn all(&self) -> Vec<Arc<Candidate>> {
        self.best
            .iter()
            .chain(&self.diverse)
            .chain(&self.random)
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.best
            .iter()
            .chain(&self.diverse)
            .chain(&self.random)
            .any(|c| c.id == id)
    }
}

/// Read-only sampling view over the arena and feature map.
pub struct SamplingEngine<'a> {
    arena: &'a CandidateArena,
    map: &'a FeatureMap,
    config: &'a SamplingConfig,
}

impl<'a> SamplingEngine<'a> {
    pub fn new(arena: &'a CandidateArena, map: &'a FeatureMap, config: &'a SamplingConfig) -> Self {
        Self { arena, map, config }
    }

    /// Draw a parent from `island`.
    ///
    /// With probability `alpha` the draw is uniform over the island's elites,
    /// otherwise uniform over its whole population. An empty pool falls back
    /// to the other one; `None` only if the island has no candidates.
    pub fn sample_parent(
        &self,
        island: &Island,
        alpha: f64,
        rng: &mut EvolutionRng,
    ) -> Option<Arc<Candidate>> {
        if rng.chance(alpha) {
            self.pick_elite(island, rng)
                .or_else(|| self.pick_member(island, rng))
        } else {
            self.pick_member(island, rng)
                .or_else(|| self.pick_elite(island, rng))
        }
    }

    fn pick_elite(&self, island: &Island, rng: &mut EvolutionRng) -> Option<Arc<Candidate>> {
        let elites = island.elites(self.arena);
        rng.pick(&elites).cloned()
    }

    fn pick_member(&self, island: &Island, rng: &mut EvolutionRng) -> Option<Arc<Candidate>> {
        let population = island.population();
        rng.pick(&population).and_then(|id| self.arena.get(*id))
    }

    /// Collect cousins for `parent` on `island`.
    ///
    /// Counts are targets: slots that cannot be filled are omitted. The parent
    /// is never returned and no candidate appears twice.
    pub fn sample_cousins(
        &self,
        parent: &Candidate,
        island: &Island,
        counts: CousinCounts,
        rng: &mut EvolutionRng,
    ) -> Cousins {
        let mut taken: HashSet<CandidateId> = HashSet::from([parent.id]);
        let mut cousins = Cousins::default();

        cousins.best = island
            .ranked_elites(self.arena)
            .into_iter()
            .filter(|c| c.id != parent.id)
            .take(counts.best)
            .collect();
        taken.extend(cousins.best.iter().map(|c| c.id));

        if let Some(origin) = parent.cell() {
            for _ in 0..counts.diverse {
                let mut found = None;
                for _ in 0..self.config.neighbor_attempts {
                    let neighbor = self.perturb(origin, rng);
                    match self.map.get(&neighbor) {
                        Some(occupant) if !taken.contains(&occupant.id) => {
                            found = Some(occupant);
                            break;
                        }
                        Some(_) => {}
                        None => cousins.neighbor_misses += 1,
                    }
                }
                if let Some(occupant) = found {
                    taken.insert(occupant.id);
                    cousins.diverse.push(occupant);
                }
            }
        }

        let pool: Vec<CandidateId> = island
            .population()
            .into_iter()
            .filter(|id| !taken.contains(id))
            .collect();
        let drawn = rng.pick_many(&pool, counts.random);
        cousins.random = self.arena.resolve(&drawn);

        cousins
    }

    /// Gaussian step on continuous bins, random bit flips on categorical ones.
    fn perturb(&self, origin: &FeatureVector, rng: &mut EvolutionRng) -> FeatureVector {
        let dims = self.map.encoder().dimensions();
        let bins = origin
            .bins()
            .iter()
            .zip(dims)
            .map(|(&bin, dim)| match &dim.kind {
                DimensionKind::Continuous { bins, .. } => {
                    rng.perturb_bin(bin, self.config.sigma, *bins)
                }
                DimensionKind::CategoricalBitset { tags } => {
                    let width = tags.len() as u32;
                    let flips = self.config.bit_flips.unwrap_or((width / 4).max(1));
                    rng.flip_bits(bin, width, flips)
                }
            })
            .collect();
        FeatureVector::new(bins)
    }
}
