//! Preference matrices and consistency diagnostics.
//!
//! A "permutation" is a pair whose axiom preference disagrees with the
//! original ranking. Counting permutations per document shows where a ranking
//! violates an axiom, without reordering anything.

use nalgebra::{DMatrix, Scalar};
use serde::{Serialize, Serializer};

use crate::axiom::{Axiom, AxiomError, Preference, PreferenceMatrix};
use crate::types::Ranked;

/// Square matrix of pairwise disagreements with the original ranking.
pub type PermutationMatrix = DMatrix<bool>;

/// Preferences for every ordered pair of `outputs`.
pub fn preference_matrix<I, O, A>(
    axiom: &A,
    input: &I,
    outputs: &[O],
) -> Result<PreferenceMatrix, AxiomError>
where
    I: Sync,
    O: Sync,
    A: Axiom<I, O> + ?Sized,
{
    axiom.preferences(input, outputs)
}

/// Whether a preference for the pair (i, j) contradicts their original ranks.
pub fn is_permutation(preference: Preference, rank_i: usize, rank_j: usize) -> bool {
    if preference > 0.0 {
        rank_i > rank_j
    } else if preference < 0.0 {
        rank_i < rank_j
    } else {
        rank_i != rank_j
    }
}

/// Disagreements between `preferences` and the ranks of `outputs`.
///
/// The diagonal is always `false`.
pub fn permutations_from_preferences<O: Ranked>(
    preferences: &PreferenceMatrix,
    outputs: &[O],
) -> PermutationMatrix {
    let n = outputs.len();
    DMatrix::from_fn(n, n, |i, j| {
        i != j && is_permutation(preferences[(i, j)], outputs[i].rank(), outputs[j].rank())
    })
}

pub fn permutation_matrix<I, O, A>(
    axiom: &A,
    input: &I,
    outputs: &[O],
) -> Result<PermutationMatrix, AxiomError>
where
    I: Sync,
    O: Ranked + Sync,
    A: Axiom<I, O> + ?Sized,
{
    let preferences = preference_matrix(axiom, input, outputs)?;
    Ok(permutations_from_preferences(&preferences, outputs))
}

/// Number of disagreements per document (row sums).
pub fn permutation_counts(permutations: &PermutationMatrix) -> Vec<usize> {
    permutations
        .row_iter()
        .map(|row| row.iter().filter(|v| **v).count())
        .collect()
}

/// Row sums normalized by the number of documents; each value lies in [0, 1).
pub fn permutation_frequency(permutations: &PermutationMatrix) -> Vec<f64> {
    let n = permutations.nrows();
    if n == 0 {
        return Vec::new();
    }
    permutation_counts(permutations)
        .into_iter()
        .map(|count| count as f64 / n as f64)
        .collect()
}

/// Share of ordered pairs that agree with the original ranking.
///
/// Rankings with fewer than two documents are trivially consistent.
pub fn consistency(permutations: &PermutationMatrix) -> f64 {
    let n = permutations.nrows();
    if n < 2 {
        return 1.0;
    }
    let pairs = (n * (n - 1)) as f64;
    let disagreements = permutations.iter().filter(|v| **v).count() as f64;
    1.0 - disagreements / pairs
}

/// Everything the diagnostics compute for one ranking.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyAnalysis {
    pub axiom: String,
    pub ids: Vec<String>,
    #[serde(serialize_with = "serialize_rows")]
    pub preferences: PreferenceMatrix,
    #[serde(serialize_with = "serialize_rows")]
    pub permutations: PermutationMatrix,
    pub permutation_counts: Vec<usize>,
    pub permutation_frequency: Vec<f64>,
    pub consistency: f64,
}

/// Run the full consistency analysis of `outputs` against `axiom`.
pub fn analyze<I, O, A>(
    axiom: &A,
    input: &I,
    outputs: &[O],
) -> Result<ConsistencyAnalysis, AxiomError>
where
    I: Sync,
    O: Ranked + Sync,
    A: Axiom<I, O> + ?Sized,
{
    let preferences = preference_matrix(axiom, input, outputs)?;
    let permutations = permutations_from_preferences(&preferences, outputs);
    Ok(ConsistencyAnalysis {
        axiom: axiom.name(),
        ids: outputs.iter().map(|o| o.id().to_string()).collect(),
        permutation_counts: permutation_counts(&permutations),
        permutation_frequency: permutation_frequency(&permutations),
        consistency: consistency(&permutations),
        preferences,
        permutations,
    })
}

fn serialize_rows<T, S>(matrix: &DMatrix<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Scalar + Serialize,
    S: Serializer,
{
    let rows: Vec<Vec<T>> = matrix
        .row_iter()
        .map(|row| row.iter().cloned().collect())
        .collect();
    rows.serialize(serializer)
}
