//! Strategy Evolve - Quality-diversity archive for evolving trading strategies.
//!
//! This crate provides the evolutionary database behind an LLM-driven
//! strategy discovery loop: a MAP-Elites feature map keeping the best
//! strategy per behavioral cell, an island model with one island per
//! strategy category, parent/cousin sampling, periodic elite migration and a
//! curated repository of insights.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, candidate, checkpoint and statistics types
//! - `evolution`: Feature encoding, the shared archive, islands and sampling
//!
//! # Example
//!
//! ```rust,no_run
//! use strategy_evolve::{
//!     evolution::EvolutionaryDatabase,
//!     schema::{CandidateSubmission, DatabaseConfig},
//! };
//!
//! let mut config = DatabaseConfig::default();
//! config.random_seed = Some(7);
//! let mut db = EvolutionaryDatabase::new(config).unwrap();
//!
//! let seeds = (0..db.islands().len())
//!     .map(|i| CandidateSubmission::new(format!("seed {i}"), "").on_island(i))
//!     .collect();
//! db.initialize(seeds).unwrap();
//!
//! let outcome = db
//!     .ingest(
//!         CandidateSubmission::new("RSI mean reversion", "...")
//!             .with_metric("sharpe_ratio", 1.2)
//!             .with_metric("max_drawdown", -12.0)
//!             .with_tag("Mean-Reversion")
//!             .on_island(1),
//!     )
//!     .unwrap();
//! println!("accepted: {}", outcome.accepted());
//! println!("{}", db.statistics());
//! ```

pub mod evolution;
pub mod schema;

// Re-export commonly used types
pub use evolution::{CandidateGenerator, DatabaseError, EvolutionaryDatabase};
pub use schema::{CandidateSubmission, Checkpoint, DatabaseConfig};
