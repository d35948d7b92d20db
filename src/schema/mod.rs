//! Schema module - Configuration, candidate and reporting types.

mod candidate;
mod checkpoint;
mod config;
mod insight;
mod statistics;

pub use candidate::*;
pub use checkpoint::*;
pub use config::*;
pub use insight::*;
pub use statistics::*;
