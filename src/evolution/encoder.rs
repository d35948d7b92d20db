//! Feature encoding: candidate metrics and tags to feature-map coordinates.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::schema::{DimensionKind, FeatureDimension, FeatureKey, FeatureVector};

/// A feature vector that does not fit the configured dimensions.
///
/// This is a configuration bug on the caller's side and is never coerced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DimensionError {
    #[error("Feature vector has {found} components, expected {expected}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("Bin {bin} on dimension {dimension} is outside [0, {max}]")]
    BinOutOfRange {
        dimension: String,
        bin: u32,
        max: u32,
    },
}

/// Normalized form of a tag used for registry lookups.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Stable tag → bit position mapping, fixed at construction.
#[derive(Debug, Clone)]
struct TagRegistry {
    bits: HashMap<String, u32>,
}

impl TagRegistry {
    fn new(tags: &[String]) -> Self {
        let bits = tags
            .iter()
            .enumerate()
            .map(|(bit, tag)| (normalize_tag(tag), bit as u32))
            .collect();
        Self { bits }
    }

    fn bit(&self, tag: &str) -> Option<u32> {
        self.bits.get(&normalize_tag(tag)).copied()
    }
}

/// Maps metrics and tags onto discrete feature-map cells.
///
/// Encoding is pure: the same inputs always produce the same key.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    dimensions: Vec<FeatureDimension>,
    registries: Vec<Option<TagRegistry>>,
}

impl FeatureEncoder {
    /// Create an encoder over a fixed, ordered list of dimensions.
    pub fn new(dimensions: Vec<FeatureDimension>) -> Self {
        let registries = dimensions
            .iter()
            .map(|dim| match &dim.kind {
                DimensionKind::CategoricalBitset { tags } => Some(TagRegistry::new(tags)),
                DimensionKind::Continuous { .. } => None,
            })
            .collect();
        Self {
            dimensions,
            registries,
        }
    }

    pub fn dimensions(&self) -> &[FeatureDimension] {
        &self.dimensions
    }

    /// Number of components in every feature vector.
    pub fn arity(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of cells in the full feature space, saturating at `u64::MAX`.
    pub fn total_cells(&self) -> u64 {
        self.dimensions
            .iter()
            .fold(1u64, |acc, dim| acc.saturating_mul(dim.bin_count() as u64))
    }

    /// Bit assigned to `tag` on a categorical dimension.
    pub fn tag_bit(&self, dimension: usize, tag: &str) -> Option<u32> {
        self.registries
            .get(dimension)
            .and_then(Option::as_ref)
            .and_then(|registry| registry.bit(tag))
    }

    /// Encode a candidate's metrics and tags.
    ///
    /// Continuous values outside their range clamp to the edge bins; a missing
    /// metric reads as `0.0`. A non-finite value on a continuous dimension
    /// yields [`FeatureKey::Invalid`]. Categorical dimensions set one bit per
    /// registered tag present; with no registered tag present they fall back
    /// to a precomputed `<name>_bin` metric when one exists.
    pub fn encode(&self, metrics: &BTreeMap<String, f64>, tags: &BTreeSet<String>) -> FeatureKey {
        let mut bins = Vec::with_capacity(self.dimensions.len());

        for (index, dim) in self.dimensions.iter().enumerate() {
            match &dim.kind {
                DimensionKind::Continuous { range, bins: count } => {
                    let value = metrics.get(&dim.name).copied().unwrap_or(0.0);
                    if !value.is_finite() {
                        return FeatureKey::Invalid;
                    }
                    bins.push(continuous_bin(value, range.0, range.1, *count));
                }
                DimensionKind::CategoricalBitset { tags: registered } => {
                    let mask = (1u32 << registered.len()) - 1;
                    let bits = tags
                        .iter()
                        .filter_map(|tag| self.tag_bit(index, tag))
                        .fold(0u32, |acc, bit| acc | (1u32 << bit));

                    let value = if bits != 0 {
                        bits
                    } else {
                        metrics
                            .get(&format!("{}_bin", dim.name))
                            .filter(|v| v.is_finite())
                            .map(|v| (*v as i64 as u32) & mask)
                            .unwrap_or(0)
                    };
                    bins.push(value);
                }
            }
        }

        FeatureKey::Cell(FeatureVector::new(bins))
    }

    /// Check that a precomputed vector fits the configured dimensions.
    pub fn check(&self, vector: &FeatureVector) -> Result<(), DimensionError> {
        if vector.len() != self.dimensions.len() {
            return Err(DimensionError::ArityMismatch {
                expected: self.dimensions.len(),
                found: vector.len(),
            });
        }
        for (dim, &bin) in self.dimensions.iter().zip(vector.bins()) {
            let max = dim.bin_count() - 1;
            if bin > max {
                return Err(DimensionError::BinOutOfRange {
                    dimension: dim.name.clone(),
                    bin,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// `clamp(floor((value - lo) / (hi - lo) * bins), 0, bins - 1)`.
pub fn continuous_bin(value: f64, lo: f64, hi: f64, bins: u32) -> u32 {
    let top = bins.saturating_sub(1) as f64;
    let scaled = ((value - lo) / (hi - lo) * bins as f64).floor();
    scaled.clamp(0.0, top) as u32
}
