//! Database configuration types.
//!
//! Every section deserializes with defaults, so a config file only needs to
//! name the fields it overrides.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Widest categorical bitset accepted (2^16 values per dimension).
pub const MAX_BIT_WIDTH: u32 = 16;

/// Top-level configuration for the evolutionary database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Ordered behavioral dimensions. Fixed for the lifetime of a run.
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<FeatureDimension>,
    /// Strategy categories; one island per category plus the benchmark island.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Label of the extra benchmark island.
    #[serde(default = "default_benchmark_category")]
    pub benchmark_category: String,
    /// Parent and cousin sampling.
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Elite migration between islands.
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Insight repository curation.
    #[serde(default)]
    pub insights: InsightConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            categories: default_categories(),
            benchmark_category: default_benchmark_category(),
            sampling: SamplingConfig::default(),
            migration: MigrationConfig::default(),
            insights: InsightConfig::default(),
            random_seed: None,
        }
    }
}

fn default_dimensions() -> Vec<FeatureDimension> {
    vec![
        FeatureDimension::categorical(
            "strategy_category",
            default_categories().iter().map(String::as_str),
        ),
        FeatureDimension::continuous("sharpe_ratio", -1.0, 3.0, 10),
        FeatureDimension::continuous("sortino_ratio", -1.0, 4.0, 10),
        FeatureDimension::continuous("max_drawdown", -100.0, 0.0, 10),
        FeatureDimension::continuous("total_return", -50.0, 150.0, 10),
        FeatureDimension::continuous("trading_frequency", 0.0, 250.0, 10),
    ]
}

fn default_categories() -> Vec<String> {
    [
        "Momentum/Trend",
        "Mean-Reversion",
        "Volatility",
        "Volume/Liquidity",
        "Breakout/Pattern",
        "Correlation/Pairs",
        "Risk/Allocation",
        "Seasonal/Calendar Effects",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_benchmark_category() -> String {
    "Buy-and-Hold Benchmark".to_string()
}

/// A named behavioral axis of the feature map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDimension {
    /// Dimension name. Continuous dimensions read the metric of this name.
    pub name: String,
    /// How values are discretized.
    pub kind: DimensionKind,
}

/// Discretization scheme for a feature dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionKind {
    /// Metric value binned uniformly over `range`.
    Continuous {
        /// Inclusive value range; values outside clamp to the edge bins.
        range: (f64, f64),
        /// Number of bins.
        bins: u32,
    },
    /// One bit per registered tag; the bin is the bitset value itself.
    CategoricalBitset {
        /// Tag registry. Position in this list is the bit index.
        tags: Vec<String>,
    },
}

impl FeatureDimension {
    /// Continuous dimension over `[lo, hi]` with `bins` bins.
    pub fn continuous(name: impl Into<String>, lo: f64, hi: f64, bins: u32) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Continuous {
                range: (lo, hi),
                bins,
            },
        }
    }

    /// Categorical bitset dimension with one bit per tag.
    pub fn categorical<I, S>(name: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: DimensionKind::CategoricalBitset {
                tags: tags.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Number of distinct bin values on this dimension.
    pub fn bin_count(&self) -> u32 {
        match &self.kind {
            DimensionKind::Continuous { bins, .. } => *bins,
            DimensionKind::CategoricalBitset { tags } => 1u32 << tags.len().min(31),
        }
    }

    /// Bit width for categorical dimensions, `None` for continuous ones.
    pub fn bit_width(&self) -> Option<u32> {
        match &self.kind {
            DimensionKind::Continuous { .. } => None,
            DimensionKind::CategoricalBitset { tags } => Some(tags.len() as u32),
        }
    }
}

/// Parent and cousin sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Probability of drawing the parent from the island's elites rather than
    /// its whole population.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Target cousin counts per group.
    #[serde(default)]
    pub cousins: CousinCounts,
    /// Standard deviation (in bins) of the Gaussian neighbor perturbation.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Bit flips applied to categorical bins. `None` means `max(1, width / 4)`.
    #[serde(default)]
    pub bit_flips: Option<u32>,
    /// Perturbation attempts per diverse-cousin slot before it is omitted.
    #[serde(default = "default_neighbor_attempts")]
    pub neighbor_attempts: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            cousins: CousinCounts::default(),
            sigma: default_sigma(),
            bit_flips: None,
            neighbor_attempts: default_neighbor_attempts(),
        }
    }
}

fn default_alpha() -> f64 {
    0.5
}
fn default_sigma() -> f64 {
    1.0
}
fn default_neighbor_attempts() -> u32 {
    5
}

/// Target number of cousins per selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CousinCounts {
    /// Highest-scoring island elites.
    #[serde(default = "default_best_cousins")]
    pub best: usize,
    /// Feature-space neighbors of the parent.
    #[serde(default = "default_diverse_cousins")]
    pub diverse: usize,
    /// Uniform draws from the island population.
    #[serde(default = "default_random_cousins")]
    pub random: usize,
}

impl Default for CousinCounts {
    fn default() -> Self {
        Self {
            best: default_best_cousins(),
            diverse: default_diverse_cousins(),
            random: default_random_cousins(),
        }
    }
}

impl CousinCounts {
    /// Total number of cousin slots.
    pub fn total(&self) -> usize {
        self.best + self.diverse + self.random
    }
}

fn default_best_cousins() -> usize {
    2
}
fn default_diverse_cousins() -> usize {
    3
}
fn default_random_cousins() -> usize {
    2
}

/// Elite migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Migrate every `interval` generations.
    #[serde(default = "default_migration_interval")]
    pub interval: u64,
    /// Top elites copied out of each island per migration.
    #[serde(default = "default_migrants")]
    pub migrants: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            interval: default_migration_interval(),
            migrants: default_migrants(),
        }
    }
}

fn default_migration_interval() -> u64 {
    10
}
fn default_migrants() -> usize {
    5
}

/// Insight repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    /// Curate every `curation_interval` generations.
    #[serde(default = "default_curation_interval")]
    pub curation_interval: u64,
    /// Insights more similar than this (token Jaccard) to a retained one are dropped.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Maximum insights kept after curation.
    #[serde(default = "default_retention_cap")]
    pub retention_cap: usize,
    /// Number of insights handed to the generator each step.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// Importance scoring policy.
    #[serde(default)]
    pub importance: ImportancePolicy,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            curation_interval: default_curation_interval(),
            similarity_threshold: default_similarity_threshold(),
            retention_cap: default_retention_cap(),
            recent_window: default_recent_window(),
            importance: ImportancePolicy::default(),
        }
    }
}

fn default_curation_interval() -> u64 {
    50
}
fn default_similarity_threshold() -> f64 {
    0.5
}
fn default_retention_cap() -> usize {
    100
}
fn default_recent_window() -> usize {
    50
}

/// Heuristic policy used to rank insights at curation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportancePolicy {
    /// Relative weight of each component.
    #[serde(default)]
    pub weights: ImportanceWeights,
    /// Words suggesting the insight describes something new.
    #[serde(default = "default_novelty_keywords")]
    pub novelty_keywords: Vec<String>,
    /// Words suggesting the insight can be acted upon.
    #[serde(default = "default_actionability_keywords")]
    pub actionability_keywords: Vec<String>,
    /// Keyword hits at which a keyword component saturates at 1.0.
    #[serde(default = "default_keyword_saturation")]
    pub keyword_saturation: usize,
}

impl Default for ImportancePolicy {
    fn default() -> Self {
        Self {
            weights: ImportanceWeights::default(),
            novelty_keywords: default_novelty_keywords(),
            actionability_keywords: default_actionability_keywords(),
            keyword_saturation: default_keyword_saturation(),
        }
    }
}

fn default_novelty_keywords() -> Vec<String> {
    [
        "novel",
        "new",
        "unexplored",
        "unusual",
        "unexpected",
        "surprising",
        "alternative",
        "untested",
        "overlooked",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_actionability_keywords() -> Vec<String> {
    [
        "should", "avoid", "use", "increase", "decrease", "reduce", "combine", "add", "remove",
        "replace", "filter", "threshold", "try", "limit",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_keyword_saturation() -> usize {
    2
}

/// Weights of the insight importance components. Normalized by their sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImportanceWeights {
    #[serde(default = "default_weight")]
    pub recency: f64,
    #[serde(default = "default_weight")]
    pub performance: f64,
    #[serde(default = "default_weight")]
    pub novelty: f64,
    #[serde(default = "default_weight")]
    pub actionability: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            recency: default_weight(),
            performance: default_weight(),
            novelty: default_weight(),
            actionability: default_weight(),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

impl ImportanceWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.recency + self.performance + self.novelty + self.actionability
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one feature dimension is required")]
    NoDimensions,
    #[error("Duplicate feature dimension: {0}")]
    DuplicateDimension(String),
    #[error("Dimension {name} has an empty or inverted range ({lo}, {hi})")]
    InvalidRange { name: String, lo: f64, hi: f64 },
    #[error("Dimension {0} must have at least one bin")]
    ZeroBins(String),
    #[error("Dimension {name} has bit width {bits}; expected 1..={max}", max = MAX_BIT_WIDTH)]
    InvalidBitWidth { name: String, bits: u32 },
    #[error("Dimension {name} registers tag {tag:?} twice")]
    DuplicateTag { name: String, tag: String },
    #[error("Alpha must lie in [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("Perturbation sigma must be positive and finite, got {0}")]
    InvalidSigma(f64),
    #[error("{0} interval must be non-zero")]
    ZeroInterval(&'static str),
    #[error("Similarity threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("Invalid importance weights: {0}")]
    InvalidWeights(String),
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DatabaseConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Number of islands: one per category plus the benchmark.
    pub fn island_count(&self) -> usize {
        self.categories.len() + 1
    }

    /// Island labels in island-id order.
    pub fn island_labels(&self) -> Vec<String> {
        self.categories
            .iter()
            .cloned()
            .chain(std::iter::once(self.benchmark_category.clone()))
            .collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions.is_empty() {
            return Err(ConfigError::NoDimensions);
        }

        let mut names = HashSet::new();
        for dim in &self.dimensions {
            if !names.insert(dim.name.as_str()) {
                return Err(ConfigError::DuplicateDimension(dim.name.clone()));
            }
            match &dim.kind {
                DimensionKind::Continuous { range, bins } => {
                    let (lo, hi) = *range;
                    if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                        return Err(ConfigError::InvalidRange {
                            name: dim.name.clone(),
                            lo,
                            hi,
                        });
                    }
                    if *bins == 0 {
                        return Err(ConfigError::ZeroBins(dim.name.clone()));
                    }
                }
                DimensionKind::CategoricalBitset { tags } => {
                    let bits = tags.len() as u32;
                    if bits == 0 || bits > MAX_BIT_WIDTH {
                        return Err(ConfigError::InvalidBitWidth {
                            name: dim.name.clone(),
                            bits,
                        });
                    }
                    let mut seen = HashSet::new();
                    for tag in tags {
                        if !seen.insert(tag.trim().to_lowercase()) {
                            return Err(ConfigError::DuplicateTag {
                                name: dim.name.clone(),
                                tag: tag.clone(),
                            });
                        }
                    }
                }
            }
        }

        if !(0.0..=1.0).contains(&self.sampling.alpha) {
            return Err(ConfigError::InvalidAlpha(self.sampling.alpha));
        }
        if !self.sampling.sigma.is_finite() || self.sampling.sigma <= 0.0 {
            return Err(ConfigError::InvalidSigma(self.sampling.sigma));
        }
        if self.migration.interval == 0 {
            return Err(ConfigError::ZeroInterval("Migration"));
        }
        if self.insights.curation_interval == 0 {
            return Err(ConfigError::ZeroInterval("Curation"));
        }
        if !(0.0..=1.0).contains(&self.insights.similarity_threshold) {
            return Err(ConfigError::InvalidThreshold(
                self.insights.similarity_threshold,
            ));
        }

        let weights = &self.insights.importance.weights;
        let all = [
            weights.recency,
            weights.performance,
            weights.novelty,
            weights.actionability,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidWeights(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.total() <= 0.0 {
            return Err(ConfigError::InvalidWeights(
                "at least one weight must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = DatabaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.island_count(), 9);
        assert_eq!(config.dimensions[0].bin_count(), 256);
    }

    #[test]
    fn test_serialization() {
        let config = DatabaseConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = DatabaseConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.dimensions, config.dimensions);
        assert_eq!(parsed.sampling.cousins, config.sampling.cousins);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "categories": ["Momentum"],
            "dimensions": [
                {"name": "sharpe_ratio", "kind": {"type": "continuous", "range": [0.0, 1.0], "bins": 4}},
                {"name": "style", "kind": {"type": "categorical_bitset", "tags": ["a", "b"]}}
            ],
            "migration": {"interval": 3}
        }"#;
        let config = DatabaseConfig::from_json_str(json).unwrap();
        assert_eq!(config.island_count(), 2);
        assert_eq!(config.migration.interval, 3);
        assert_eq!(config.migration.migrants, 5);
        assert_eq!(config.sampling.neighbor_attempts, 5);
        assert_eq!(config.dimensions[1].bin_count(), 4);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = DatabaseConfig {
            dimensions: vec![FeatureDimension::continuous("x", 1.0, 0.0, 4)],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_tags() {
        let config = DatabaseConfig {
            dimensions: vec![FeatureDimension::categorical("c", ["Trend", "trend "])],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateTag { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_alpha_and_intervals() {
        let mut config = DatabaseConfig::default();
        config.sampling.alpha = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAlpha(_))));

        let mut config = DatabaseConfig::default();
        config.migration.interval = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval("Migration"))
        ));
    }
}
