//! Pivot selection for KwikSort partitions.

use std::fmt;
use std::str::FromStr;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Chooses the pivot of a partition.
///
/// `candidates` is never empty. The returned index must be in
/// `0..candidates.len()`; anything else aborts the rerank with
/// [`super::RerankError::InvalidPivot`].
pub trait PivotSelection<I, O>: Send + Sync {
    fn select_pivot(&self, input: &I, candidates: &[&O], rng: &mut dyn RngCore) -> usize;
}

/// Uniformly random pivot. Gives KwikSort its expected O(n log n) bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPivot;

impl<I, O> PivotSelection<I, O> for RandomPivot {
    fn select_pivot(&self, _input: &I, candidates: &[&O], rng: &mut dyn RngCore) -> usize {
        rng.gen_range(0..candidates.len())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FirstPivot;

impl<I, O> PivotSelection<I, O> for FirstPivot {
    fn select_pivot(&self, _input: &I, _candidates: &[&O], _rng: &mut dyn RngCore) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LastPivot;

impl<I, O> PivotSelection<I, O> for LastPivot {
    fn select_pivot(&self, _input: &I, candidates: &[&O], _rng: &mut dyn RngCore) -> usize {
        candidates.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MiddlePivot;

impl<I, O> PivotSelection<I, O> for MiddlePivot {
    fn select_pivot(&self, _input: &I, candidates: &[&O], _rng: &mut dyn RngCore) -> usize {
        candidates.len() / 2
    }
}

/// Built-in strategies, selectable from config files and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotStrategy {
    #[default]
    Random,
    First,
    Last,
    Middle,
}

impl PivotStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            PivotStrategy::Random => "random",
            PivotStrategy::First => "first",
            PivotStrategy::Last => "last",
            PivotStrategy::Middle => "middle",
        }
    }
}

impl fmt::Display for PivotStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PivotStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(PivotStrategy::Random),
            "first" => Ok(PivotStrategy::First),
            "last" => Ok(PivotStrategy::Last),
            "middle" => Ok(PivotStrategy::Middle),
            other => Err(format!(
                "unknown pivot strategy '{other}' (expected random, first, last or middle)"
            )),
        }
    }
}

impl<I, O> PivotSelection<I, O> for PivotStrategy {
    fn select_pivot(&self, input: &I, candidates: &[&O], rng: &mut dyn RngCore) -> usize {
        match self {
            PivotStrategy::Random => RandomPivot.select_pivot(input, candidates, rng),
            PivotStrategy::First => FirstPivot.select_pivot(input, candidates, rng),
            PivotStrategy::Last => LastPivot.select_pivot(input, candidates, rng),
            PivotStrategy::Middle => MiddlePivot.select_pivot(input, candidates, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn pick(strategy: &dyn PivotSelection<(), u32>, candidates: &[u32], seed: u64) -> usize {
        let refs: Vec<&u32> = candidates.iter().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        strategy.select_pivot(&(), &refs, &mut rng)
    }

    #[test]
    fn deterministic_strategies() {
        let candidates = [10, 20, 30, 40, 50];
        assert_eq!(pick(&FirstPivot, &candidates, 0), 0);
        assert_eq!(pick(&LastPivot, &candidates, 0), 4);
        assert_eq!(pick(&MiddlePivot, &candidates, 0), 2);
        assert_eq!(pick(&MiddlePivot, &[1], 0), 0);
    }

    #[test]
    fn random_pivot_is_in_range_and_seeded() {
        let candidates: Vec<u32> = (0..17).collect();
        for seed in 0..64 {
            let idx = pick(&RandomPivot, &candidates, seed);
            assert!(idx < candidates.len());
            assert_eq!(idx, pick(&RandomPivot, &candidates, seed));
        }
    }

    #[test]
    fn strategy_parses_and_serializes() {
        assert_eq!("Middle".parse::<PivotStrategy>().unwrap(), PivotStrategy::Middle);
        assert!("median".parse::<PivotStrategy>().is_err());
        assert_eq!(PivotStrategy::default(), PivotStrategy::Random);
        let json = serde_json::to_string(&PivotStrategy::Last).unwrap();
        assert_eq!(json, "\"last\"");
        assert_eq!(pick(&PivotStrategy::Last, &[1, 2, 3], 0), 2);
    }
}
