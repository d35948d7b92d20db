//! Island-model quality-diversity search over trading strategies.
//!
//! # Overview
//!
//! - **Feature Encoder** (`encoder`): Metrics and tags to discrete cells
//! - **Feature Map** (`feature_map`): One elite per cell, shared by all islands
//! - **Islands** (`island`): Per-category population histories
//! - **Sampling** (`sampling`): Parent and cousin selection
//! - **Insights** (`insights`): Textual learnings and their curation
//! - **Database** (`database`): The facade tying these together
//!
//! Candidates are stored once in an arena and referenced by id everywhere
//! else; the feature map, island populations and the rejected archive hold
//! ids only.
//!
//! # Example
//!
//! ```rust,no_run
//! use strategy_evolve::evolution::{EvolutionaryDatabase, GenerationRequest};
//! use strategy_evolve::schema::{CandidateSubmission, DatabaseConfig};
//!
//! let config = DatabaseConfig::default();
//! let seeds: Vec<CandidateSubmission> = config
//!     .island_labels()
//!     .into_iter()
//!     .map(|label| CandidateSubmission::new(format!("{label} seed"), "").with_tag(label))
//!     .collect();
//!
//! let mut db = EvolutionaryDatabase::new(config).unwrap();
//! db.initialize(seeds).unwrap();
//!
//! let generator = |request: &GenerationRequest| {
//!     // Ask a model for a new hypothesis, implement and backtest it...
//!     Some(
//!         CandidateSubmission::new("tighter stops", &*request.parent.code)
//!             .with_metric("sharpe_ratio", request.parent.score + 0.1),
//!     )
//! };
//! let report = db.evolve_generation(&generator).unwrap();
//! println!("Generation {}: {}", report.generation, db.statistics());
//! ```

mod arena;
mod database;
mod encoder;
mod feature_map;
mod generator;
mod insights;
mod island;
mod sampling;

pub use arena::{CandidateArena, RejectedArchive};
pub use database::{
    CHECKPOINT_FILE, DatabaseError, EvolutionaryDatabase, GenerationReport, IngestOutcome,
    IslandStep, MigrationReport,
};
pub use encoder::{DimensionError, FeatureEncoder, continuous_bin, normalize_tag};
pub use feature_map::{FeatureMap, Placement};
pub use generator::{CandidateGenerator, GenerationRequest};
pub use insights::{CurationReport, InsightRepository, jaccard, tokenize};
pub use island::Island;
pub use sampling::{Cousins, EvolutionRng, SamplingEngine};
