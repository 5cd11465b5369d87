//! Pairwise preference functions ("axioms").
//!
//! An axiom compares two outputs for the same input and returns a signed
//! preference:
//! - positive: prefer the first output
//! - negative: prefer the second output
//! - exactly zero: no opinion
//!
//! Axioms compose through [`algebra::AxiomExpr`], are gated by
//! [`precondition::Masked`], and memoized by [`crate::cache::CachedAxiom`].

pub mod algebra;
pub mod basic;
pub mod precondition;

use std::sync::Arc;

use nalgebra::{DMatrix, Scalar};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;

pub use algebra::AxiomExpr;
pub use basic::{compare_ids, OriginalRank, StrictlyGreater};
pub use precondition::{
    AllOf, Always, ApproximatelySameLength, FnPrecondition, Masked, Precondition, PreconditionRef,
};

/// Signed preference of the first output over the second.
pub type Preference = f64;

/// Square matrix of preferences; entry (i, j) compares output i to output j.
pub type PreferenceMatrix = DMatrix<Preference>;

/// Shared handle to a type-erased axiom.
pub type AxiomRef<I, O> = Arc<dyn Axiom<I, O>>;

/// How an axiom's value changes when its two outputs are swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Symmetry {
    /// `preference(x, a, b) == -preference(x, b, a)`.
    Antisymmetric,
    /// `preference(x, a, b) == preference(x, b, a)`.
    Symmetric,
    /// No guarantee.
    Unknown,
}

impl Symmetry {
    pub fn is_antisymmetric(self) -> bool {
        self == Symmetry::Antisymmetric
    }

    /// Symmetry of an operator that is antisymmetric (or symmetric) whenever
    /// all of its operands are.
    pub fn all_of(operands: impl IntoIterator<Item = Symmetry>) -> Symmetry {
        let mut anti = true;
        let mut sym = true;
        for s in operands {
            anti &= s == Symmetry::Antisymmetric;
            sym &= s == Symmetry::Symmetric;
        }
        if anti {
            Symmetry::Antisymmetric
        } else if sym {
            Symmetry::Symmetric
        } else {
            Symmetry::Unknown
        }
    }

    /// Symmetry of a product: each antisymmetric factor flips the sign once.
    pub fn product_of(operands: impl IntoIterator<Item = Symmetry>) -> Symmetry {
        let mut flips = 0usize;
        for s in operands {
            match s {
                Symmetry::Antisymmetric => flips += 1,
                Symmetry::Symmetric => {}
                Symmetry::Unknown => return Symmetry::Unknown,
            }
        }
        if flips % 2 == 1 {
            Symmetry::Antisymmetric
        } else {
            Symmetry::Symmetric
        }
    }
}

/// Errors raised while evaluating an axiom.
#[derive(Debug, thiserror::Error)]
pub enum AxiomError {
    #[error("division by zero in {axiom}")]
    DivisionByZero { axiom: String },
    #[error("minimum vote fraction must be in [0, 1], got {0}")]
    InvalidVoteFraction(f64),
    /// A collaborator (tokenizer, index, similarity model) could not answer.
    #[error("{axiom} failed: {message}")]
    Collaborator { axiom: String, message: String },
}

/// A pairwise preference function.
///
/// Implementations must be deterministic for identical arguments and must
/// return `0.0` rather than an error when they have no opinion.
pub trait Axiom<I: Sync, O: Sync>: Send + Sync {
    /// Preference of `a` over `b` for `input`.
    fn preference(&self, input: &I, a: &O, b: &O) -> Result<Preference, AxiomError>;

    /// Preferences for every ordered pair of `outputs`.
    ///
    /// The diagonal is 0. Overrides must agree with [`Axiom::preference`]
    /// everywhere else.
    fn preferences(&self, input: &I, outputs: &[O]) -> Result<PreferenceMatrix, AxiomError> {
        square_matrix(outputs.len(), 0.0, |i, j| {
            self.preference(input, &outputs[i], &outputs[j])
        })
    }

    /// Human-readable description; also the default namespace for cached values.
    ///
    /// Two axioms with the same name share entries in a preference store. Give
    /// distinct axioms distinct names, or cache them with
    /// [`AxiomExpr::cached_as`].
    fn name(&self) -> String;

    fn symmetry(&self) -> Symmetry {
        Symmetry::Unknown
    }

    /// Whether this axiom already memoizes its preferences.
    fn is_cached(&self) -> bool {
        false
    }
}

impl<I: Sync, O: Sync, A: Axiom<I, O> + ?Sized> Axiom<I, O> for Arc<A> {
    fn preference(&self, input: &I, a: &O, b: &O) -> Result<Preference, AxiomError> {
        (**self).preference(input, a, b)
    }

    fn preferences(&self, input: &I, outputs: &[O]) -> Result<PreferenceMatrix, AxiomError> {
        (**self).preferences(input, outputs)
    }

    fn name(&self) -> String {
        (**self).name()
    }

    fn symmetry(&self) -> Symmetry {
        (**self).symmetry()
    }

    fn is_cached(&self) -> bool {
        (**self).is_cached()
    }
}

/// Build an `n x n` matrix from a fallible pairwise function.
///
/// The diagonal is set to `diagonal` without calling `f`. Rows are evaluated
/// on rayon workers when the `parallel` feature is enabled.
pub(crate) fn square_matrix<T, F>(n: usize, diagonal: T, f: F) -> Result<DMatrix<T>, AxiomError>
where
    T: Scalar + Copy + Send + Sync,
    F: Fn(usize, usize) -> Result<T, AxiomError> + Send + Sync,
{
    let row = |i: usize| -> Result<Vec<T>, AxiomError> {
        (0..n)
            .map(|j| if i == j { Ok(diagonal) } else { f(i, j) })
            .collect()
    };

    #[cfg(feature = "parallel")]
    let rows: Vec<Vec<T>> = (0..n).into_par_iter().map(row).collect::<Result<_, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let rows: Vec<Vec<T>> = (0..n).map(row).collect::<Result<_, _>>()?;

    Ok(DMatrix::from_row_iterator(n, n, rows.into_iter().flatten()))
}
