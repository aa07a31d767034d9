//! Tuning knobs for segment layout and lookup

use std::env;
use std::str::FromStr;

use lazy_static::lazy_static;
use tracing::warn;

/// Largest permitted array length.
pub const MAX_ARRAY_LENGTH: u32 = u32::MAX;

/// Largest index that can hold an element.
pub const MAX_ARRAY_INDEX: u32 = MAX_ARRAY_LENGTH - 1;

/// Explicit configuration carried by every array.
///
/// `Default` yields the process-wide defaults, which may be overridden once
/// at startup through `SPARSE_ARRAY_*` environment variables.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArrayConfig {
    /// Number of segments a lookup may walk before a segment index is built.
    pub index_crossover: usize,
    /// Minimum degree of the segment index B-tree.
    pub index_min_degree: usize,
    /// How far past its allocation a lone head segment grows instead of
    /// starting a new segment.
    pub merge_heuristic: u32,
    /// Capacities tried, in order, for fresh small segments.
    pub allocation_buckets: [u32; 3],
    /// Keep a segment index regardless of segment count.
    pub force_index: bool,
    /// Check every structural invariant after each mutating operation.
    pub validate: bool,
}

lazy_static! {
    static ref DEFAULT_CONFIG: ArrayConfig = ArrayConfig::from_env();
}

fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable configuration override");
            None
        }
    }
}

impl ArrayConfig {
    /// Built-in defaults, ignoring the environment.
    #[must_use]
    pub const fn builtin() -> Self {
        Self {
            index_crossover: 60,
            index_min_degree: 20,
            merge_heuristic: 128,
            allocation_buckets: [4, 8, 16],
            force_index: false,
            validate: false,
        }
    }

    fn from_env() -> Self {
        let mut config = Self::builtin();
        if let Some(crossover) = env_override("SPARSE_ARRAY_INDEX_CROSSOVER") {
            config = config.with_index_crossover(crossover);
        }
        if let Some(degree) = env_override("SPARSE_ARRAY_INDEX_DEGREE") {
            config = config.with_index_min_degree(degree);
        }
        if let Some(force) = env_override("SPARSE_ARRAY_FORCE_INDEX") {
            config = config.with_force_index(force);
        }
        if let Some(validate) = env_override("SPARSE_ARRAY_VALIDATE") {
            config = config.with_validation(validate);
        }
        config
    }

    #[must_use]
    pub fn with_index_crossover(mut self, crossover: usize) -> Self {
        self.index_crossover = crossover;
        self
    }

    /// Degrees below 2 do not form a valid B-tree and are raised to 2.
    #[must_use]
    pub fn with_index_min_degree(mut self, degree: usize) -> Self {
        self.index_min_degree = degree.max(2);
        self
    }

    #[must_use]
    pub fn with_merge_heuristic(mut self, slots: u32) -> Self {
        self.merge_heuristic = slots;
        self
    }

    #[must_use]
    pub fn with_allocation_buckets(mut self, buckets: [u32; 3]) -> Self {
        self.allocation_buckets = buckets;
        self
    }

    #[must_use]
    pub fn with_force_index(mut self, force: bool) -> Self {
        self.force_index = force;
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Size for a brand new segment that must hold `needed` slots and may
    /// not exceed `bound`.
    pub(crate) fn initial_size(&self, needed: u32, bound: u32) -> u32 {
        let bucket = self
            .allocation_buckets
            .iter()
            .copied()
            .find(|bucket| *bucket >= needed)
            .unwrap_or(needed);
        bucket.min(bound).max(needed)
    }

    /// Size for a segment of `current` slots that must reach `needed` slots
    /// without exceeding `bound`.
    pub(crate) fn grown_size(&self, current: u32, needed: u32, bound: u32) -> u32 {
        if current == 0 {
            return self.initial_size(needed, bound);
        }
        current.saturating_mul(2).max(needed).min(bound).max(needed)
    }
}

impl Default for ArrayConfig {
    fn default() -> Self {
        *DEFAULT_CONFIG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_segments_use_buckets() {
        let config = ArrayConfig::builtin();
        assert_eq!(config.initial_size(1, u32::MAX), 4);
        assert_eq!(config.initial_size(5, u32::MAX), 8);
        assert_eq!(config.initial_size(16, u32::MAX), 16);
        assert_eq!(config.initial_size(17, u32::MAX), 17);
        assert_eq!(config.initial_size(1, 2), 2);
    }

    #[test]
    fn growth_doubles_within_bound() {
        let config = ArrayConfig::builtin();
        assert_eq!(config.grown_size(8, 9, u32::MAX), 16);
        assert_eq!(config.grown_size(8, 40, u32::MAX), 40);
        assert_eq!(config.grown_size(8, 9, 12), 12);
        assert_eq!(config.grown_size(0, 3, u32::MAX), 4);
        assert_eq!(config.grown_size(u32::MAX - 1, u32::MAX, u32::MAX), u32::MAX);
    }

    #[test]
    fn degree_is_clamped() {
        assert_eq!(
            ArrayConfig::builtin().with_index_min_degree(0).index_min_degree,
            2
        );
    }
}
