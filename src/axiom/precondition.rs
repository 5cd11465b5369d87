//! Preconditions gate an axiom to pairs it can meaningfully compare.
//!
//! A masked axiom answers 0 wherever its precondition fails. In batch form
//! the mask is computed first and the wrapped axiom is only evaluated where
//! the mask holds, so expensive axioms never run on incomparable pairs.

use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::types::Contents;

use super::{square_matrix, Axiom, AxiomError, AxiomRef, Preference, PreferenceMatrix, Symmetry};

/// Default margin for [`ApproximatelySameLength`].
pub const DEFAULT_LENGTH_MARGIN_FRACTION: f64 = 0.1;

/// Predicate over a comparison.
pub trait Precondition<I: Sync, O: Sync>: Send + Sync {
    fn holds(&self, input: &I, a: &O, b: &O) -> Result<bool, AxiomError>;

    /// Mask over every ordered pair of `outputs`; the diagonal is `false`.
    fn mask(&self, input: &I, outputs: &[O]) -> Result<DMatrix<bool>, AxiomError> {
        square_matrix(outputs.len(), false, |i, j| {
            self.holds(input, &outputs[i], &outputs[j])
        })
    }

    fn name(&self) -> String;

    /// Whether `holds(x, a, b) == holds(x, b, a)`.
    fn is_symmetric(&self) -> bool {
        false
    }
}

pub type PreconditionRef<I, O> = Arc<dyn Precondition<I, O>>;

/// An axiom that only applies where a precondition holds.
pub struct Masked<I: Sync, O: Sync> {
    axiom: AxiomRef<I, O>,
    precondition: PreconditionRef<I, O>,
}

impl<I: Sync, O: Sync> Masked<I, O> {
    pub fn new(axiom: AxiomRef<I, O>, precondition: PreconditionRef<I, O>) -> Self {
        Self {
            axiom,
            precondition,
        }
    }
}

impl<I: Sync, O: Sync> fmt::Debug for Masked<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Masked")
            .field("axiom", &self.axiom.name())
            .field("precondition", &self.precondition.name())
            .finish()
    }
}

impl<I: Sync, O: Sync> Axiom<I, O> for Masked<I, O> {
    fn preference(&self, input: &I, a: &O, b: &O) -> Result<Preference, AxiomError> {
        if !self.precondition.holds(input, a, b)? {
            return Ok(0.0);
        }
        self.axiom.preference(input, a, b)
    }

    fn preferences(&self, input: &I, outputs: &[O]) -> Result<PreferenceMatrix, AxiomError> {
        let mask = self.precondition.mask(input, outputs)?;
        square_matrix(outputs.len(), 0.0, |i, j| {
            if mask[(i, j)] {
                self.axiom.preference(input, &outputs[i], &outputs[j])
            } else {
                Ok(0.0)
            }
        })
    }

    fn name(&self) -> String {
        format!("{}[{}]", self.axiom.name(), self.precondition.name())
    }

    fn symmetry(&self) -> Symmetry {
        if self.precondition.is_symmetric() {
            self.axiom.symmetry()
        } else {
            Symmetry::Unknown
        }
    }
}

/// Always holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl<I: Sync, O: Sync> Precondition<I, O> for Always {
    fn holds(&self, _input: &I, _a: &O, _b: &O) -> Result<bool, AxiomError> {
        Ok(true)
    }

    fn name(&self) -> String {
        "ALWAYS".to_string()
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

/// Holds when both documents have roughly the same number of tokens.
///
/// The token counts may differ by at most `margin_fraction` times their
/// mean. Length-sensitive axioms use this to avoid comparing a snippet
/// against a full article.
#[derive(Debug, Clone, Copy)]
pub struct ApproximatelySameLength {
    pub margin_fraction: f64,
}

impl Default for ApproximatelySameLength {
    fn default() -> Self {
        Self {
            margin_fraction: DEFAULT_LENGTH_MARGIN_FRACTION,
        }
    }
}

impl ApproximatelySameLength {
    pub fn new(margin_fraction: f64) -> Self {
        Self { margin_fraction }
    }

    fn approximately_equal(&self, a: usize, b: usize) -> bool {
        let (a, b) = (a as f64, b as f64);
        let threshold = (a + b) / 2.0 * self.margin_fraction;
        (a - b).abs() <= threshold
    }
}

impl<I: Sync, O: Contents + Sync> Precondition<I, O> for ApproximatelySameLength {
    fn holds(&self, _input: &I, a: &O, b: &O) -> Result<bool, AxiomError> {
        let len_a = a.contents().split_whitespace().count();
        let len_b = b.contents().split_whitespace().count();
        Ok(self.approximately_equal(len_a, len_b))
    }

    fn name(&self) -> String {
        format!("LEN(margin={})", self.margin_fraction)
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

/// Adapter for a closure-backed precondition.
pub struct FnPrecondition<F> {
    name: String,
    symmetric: bool,
    predicate: F,
}

impl<F> FnPrecondition<F> {
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            symmetric: false,
            predicate,
        }
    }

    /// Declare that the predicate ignores argument order.
    pub fn symmetric(mut self) -> Self {
        self.symmetric = true;
        self
    }
}

impl<F> fmt::Debug for FnPrecondition<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPrecondition")
            .field("name", &self.name)
            .field("symmetric", &self.symmetric)
            .finish()
    }
}

impl<I, O, F> Precondition<I, O> for FnPrecondition<F>
where
    I: Sync,
    O: Sync,
    F: Fn(&I, &O, &O) -> Result<bool, AxiomError> + Send + Sync,
{
    fn holds(&self, input: &I, a: &O, b: &O) -> Result<bool, AxiomError> {
        (self.predicate)(input, a, b)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_symmetric(&self) -> bool {
        self.symmetric
    }
}

/// Holds when every member holds.
pub struct AllOf<I: Sync, O: Sync> {
    preconditions: Vec<PreconditionRef<I, O>>,
}

impl<I: Sync, O: Sync> AllOf<I, O> {
    pub fn new(preconditions: Vec<PreconditionRef<I, O>>) -> Self {
        Self { preconditions }
    }
}

impl<I: Sync, O: Sync> Precondition<I, O> for AllOf<I, O> {
    fn holds(&self, input: &I, a: &O, b: &O) -> Result<bool, AxiomError> {
        for precondition in &self.preconditions {
            if !precondition.holds(input, a, b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn name(&self) -> String {
        let names = self
            .preconditions
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(" & ");
        format!("AllOf({names})")
    }

    fn is_symmetric(&self) -> bool {
        self.preconditions.iter().all(|p| p.is_symmetric())
    }
}
