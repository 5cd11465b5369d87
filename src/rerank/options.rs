//! Execution settings for reproducible reranks.

use serde::{Deserialize, Serialize};

use super::pivot::PivotStrategy;

/// Partitions at least this large evaluate preferences on rayon workers.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankOptions {
    pub pivot: PivotStrategy,
    /// Seed for the pivot RNG. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Minimum partition size for parallel preference evaluation.
    /// Ignored without the `parallel` feature.
    pub parallel_threshold: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            pivot: PivotStrategy::default(),
            rng_seed: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl RerankOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_pivot(mut self, pivot: PivotStrategy) -> Self {
        self.pivot = pivot;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options: RerankOptions = serde_json::from_str(r#"{"rng_seed": 7}"#).unwrap();
        assert_eq!(options.rng_seed, Some(7));
        assert_eq!(options.pivot, PivotStrategy::Random);
        assert_eq!(options.parallel_threshold, DEFAULT_PARALLEL_THRESHOLD);
    }
}
