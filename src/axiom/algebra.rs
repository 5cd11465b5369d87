//! Composition of axioms.
//!
//! [`AxiomExpr`] is a closed tree of operators over leaf axioms. Every node is
//! itself an [`Axiom`], so expressions nest arbitrarily. Builders flatten
//! chains of the same associative operator, keeping evaluation linear in the
//! number of leaves.

use std::fmt;
use std::ops::{Add, Mul, Neg};
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::cache::{CachedAxiom, PreferenceStore};
use crate::types::{CacheInput, Identified};

use super::precondition::{Masked, Precondition};
use super::{square_matrix, Axiom, AxiomError, AxiomRef, Preference, PreferenceMatrix, Symmetry};

/// Default quorum for [`AxiomExpr::majority`]: a simple majority.
pub const DEFAULT_MINIMUM_VOTES_FRACTION: f64 = 0.5;

/// An axiom expression tree.
pub enum AxiomExpr<I: Sync, O: Sync> {
    /// A concrete axiom.
    Leaf(AxiomRef<I, O>),
    /// The same preference for every pair.
    Constant(Preference),
    /// Arithmetic sum; empty sums are 0.
    Sum(Vec<AxiomExpr<I, O>>),
    /// Arithmetic product; any zero factor forces 0, empty products are 1.
    Product(Vec<AxiomExpr<I, O>>),
    /// Multiplicative inverse; a zero operand is an error.
    Inverse(Box<AxiomExpr<I, O>>),
    /// 1 if every operand is positive, -1 if every operand is negative, else 0.
    Conjunction(Vec<AxiomExpr<I, O>>),
    /// Majority vote with an absolute quorum of `ceil(fraction * operands)`.
    Vote {
        operands: Vec<AxiomExpr<I, O>>,
        minimum_votes_fraction: f64,
    },
    /// First non-zero operand in order.
    Cascade(Vec<AxiomExpr<I, O>>),
    /// Sign of the operand.
    Normalize(Box<AxiomExpr<I, O>>),
    /// Operand with flipped polarity.
    Negate(Box<AxiomExpr<I, O>>),
}

impl<I, O> AxiomExpr<I, O>
where
    I: Sync + 'static,
    O: Sync + 'static,
{
    pub fn leaf(axiom: impl Axiom<I, O> + 'static) -> Self {
        AxiomExpr::Leaf(Arc::new(axiom))
    }

    pub fn from_ref(axiom: AxiomRef<I, O>) -> Self {
        AxiomExpr::Leaf(axiom)
    }

    /// Explicit constant preference (`Uniform(value)`).
    pub fn constant(value: Preference) -> Self {
        AxiomExpr::Constant(value)
    }

    pub fn sum(operands: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = flatten(operands, |expr| match expr {
            AxiomExpr::Sum(ops) => Ok(ops),
            other => Err(other),
        });
        if flat.len() == 1 {
            return flat.remove(0);
        }
        AxiomExpr::Sum(flat)
    }

    pub fn product(operands: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = flatten(operands, |expr| match expr {
            AxiomExpr::Product(ops) => Ok(ops),
            other => Err(other),
        });
        if flat.len() == 1 {
            return flat.remove(0);
        }
        AxiomExpr::Product(flat)
    }

    pub fn conjunction(operands: impl IntoIterator<Item = Self>) -> Self {
        AxiomExpr::Conjunction(flatten(operands, |expr| match expr {
            AxiomExpr::Conjunction(ops) => Ok(ops),
            other => Err(other),
        }))
    }

    pub fn cascade(operands: impl IntoIterator<Item = Self>) -> Self {
        let mut flat = flatten(operands, |expr| match expr {
            AxiomExpr::Cascade(ops) => Ok(ops),
            other => Err(other),
        });
        if flat.len() == 1 {
            return flat.remove(0);
        }
        AxiomExpr::Cascade(flat)
    }

    pub fn vote(
        operands: impl IntoIterator<Item = Self>,
        minimum_votes_fraction: f64,
    ) -> Result<Self, AxiomError> {
        if !(0.0..=1.0).contains(&minimum_votes_fraction) {
            return Err(AxiomError::InvalidVoteFraction(minimum_votes_fraction));
        }
        Ok(AxiomExpr::Vote {
            operands: operands.into_iter().collect(),
            minimum_votes_fraction,
        })
    }

    pub fn majority(operands: impl IntoIterator<Item = Self>) -> Self {
        AxiomExpr::Vote {
            operands: operands.into_iter().collect(),
            minimum_votes_fraction: DEFAULT_MINIMUM_VOTES_FRACTION,
        }
    }

    pub fn inverse(self) -> Self {
        AxiomExpr::Inverse(Box::new(self))
    }

    pub fn normalize(self) -> Self {
        match self {
            AxiomExpr::Normalize(_) => self,
            other => AxiomExpr::Normalize(Box::new(other)),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            AxiomExpr::Negate(inner) => *inner,
            other => AxiomExpr::Negate(Box::new(other)),
        }
    }

    /// Multiply by a constant weight.
    pub fn scaled(self, weight: Preference) -> Self {
        Self::product([self, AxiomExpr::constant(weight)])
    }

    /// Force the preference to 0 wherever `precondition` does not hold.
    pub fn masked(self, precondition: impl Precondition<I, O> + 'static) -> Self {
        AxiomExpr::Leaf(Arc::new(Masked::new(self.into_ref(), Arc::new(precondition))))
    }

    /// Memoize preferences in `store`. Wrapping a cached expression again is a no-op.
    pub fn cached(self, store: Arc<dyn PreferenceStore>) -> Self
    where
        I: CacheInput,
        O: Identified,
    {
        AxiomExpr::Leaf(CachedAxiom::wrap(self.into_ref(), store))
    }

    /// Like [`AxiomExpr::cached`], keyed under `namespace` instead of the name.
    pub fn cached_as(self, store: Arc<dyn PreferenceStore>, namespace: impl Into<String>) -> Self
    where
        I: CacheInput,
        O: Identified,
    {
        let inner = self.into_ref();
        if inner.is_cached() {
            return AxiomExpr::Leaf(inner);
        }
        AxiomExpr::Leaf(Arc::new(CachedAxiom::with_namespace(inner, store, namespace)))
    }

    /// Type-erase this expression, unwrapping leaves.
    pub fn into_ref(self) -> AxiomRef<I, O> {
        match self {
            AxiomExpr::Leaf(axiom) => axiom,
            other => Arc::new(other),
        }
    }
}

fn flatten<T>(
    operands: impl IntoIterator<Item = T>,
    unwrap: impl Fn(T) -> Result<Vec<T>, T> + Copy,
) -> Vec<T> {
    let mut flat = Vec::new();
    for operand in operands {
        match unwrap(operand) {
            Ok(inner) => flat.extend(flatten(inner, unwrap)),
            Err(operand) => flat.push(operand),
        }
    }
    flat
}

// =============================================================================
// Scalar rules shared by the pairwise and batch paths
// =============================================================================

fn sign(value: Preference) -> Preference {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn conjunction_of(values: &[Preference]) -> Preference {
    if values.is_empty() {
        return 0.0;
    }
    if values.iter().all(|v| *v > 0.0) {
        1.0
    } else if values.iter().all(|v| *v < 0.0) {
        -1.0
    } else {
        0.0
    }
}

fn vote_of(values: &[Preference], minimum_votes_fraction: f64) -> Preference {
    let positive = values.iter().filter(|v| **v > 0.0).count();
    let negative = values.iter().filter(|v| **v < 0.0).count();
    let quorum = (minimum_votes_fraction * values.len() as f64).ceil() as usize;
    if positive > negative && positive >= quorum {
        1.0
    } else if negative > positive && negative >= quorum {
        -1.0
    } else {
        0.0
    }
}

fn join_names<I: Sync, O: Sync>(operands: &[AxiomExpr<I, O>]) -> String {
    operands
        .iter()
        .map(|op| op.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Combine operand matrices entry by entry, leaving the diagonal at 0.
fn combine(
    n: usize,
    matrices: &[PreferenceMatrix],
    rule: impl Fn(&[Preference]) -> Preference,
) -> PreferenceMatrix {
    let mut values = Vec::with_capacity(matrices.len());
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            return 0.0;
        }
        values.clear();
        values.extend(matrices.iter().map(|m| m[(i, j)]));
        rule(&values)
    })
}

impl<I: Sync, O: Sync> AxiomExpr<I, O> {
    /// Batch form of an operator that may stop early: the first operand is
    /// evaluated as a matrix, each later operand only on cells still `pending`.
    fn short_circuit(
        operands: &[AxiomExpr<I, O>],
        input: &I,
        outputs: &[O],
        empty: Preference,
        pending: impl Fn(Preference) -> bool + Send + Sync,
        merge: impl Fn(Preference, Preference) -> Preference + Send + Sync,
    ) -> Result<PreferenceMatrix, AxiomError> {
        let n = outputs.len();
        let Some((first, rest)) = operands.split_first() else {
            return Ok(combine(n, &[], |_| empty));
        };
        let mut acc = first.preferences(input, outputs)?;
        for op in rest {
            acc = square_matrix(n, 0.0, |i, j| {
                let current = acc[(i, j)];
                if !pending(current) {
                    return Ok(current);
                }
                Ok(merge(current, op.preference(input, &outputs[i], &outputs[j])?))
            })?;
        }
        Ok(acc)
    }

    fn operand_matrices(
        operands: &[AxiomExpr<I, O>],
        input: &I,
        outputs: &[O],
    ) -> Result<Vec<PreferenceMatrix>, AxiomError> {
        operands
            .iter()
            .map(|op| op.preferences(input, outputs))
            .collect()
    }
}

impl<I: Sync, O: Sync> Axiom<I, O> for AxiomExpr<I, O> {
    fn preference(&self, input: &I, a: &O, b: &O) -> Result<Preference, AxiomError> {
        match self {
            AxiomExpr::Leaf(axiom) => axiom.preference(input, a, b),
            AxiomExpr::Constant(value) => Ok(*value),
            AxiomExpr::Sum(ops) => {
                let mut total = 0.0;
                for op in ops {
                    total += op.preference(input, a, b)?;
                }
                Ok(total)
            }
            AxiomExpr::Product(ops) => {
                let mut total = 1.0;
                for op in ops {
                    let value = op.preference(input, a, b)?;
                    if value == 0.0 {
                        return Ok(0.0);
                    }
                    total *= value;
                }
                Ok(total)
            }
            AxiomExpr::Inverse(op) => {
                let value = op.preference(input, a, b)?;
                if value == 0.0 {
                    return Err(AxiomError::DivisionByZero { axiom: self.name() });
                }
                Ok(1.0 / value)
            }
            AxiomExpr::Conjunction(ops) => {
                let values = ops
                    .iter()
                    .map(|op| op.preference(input, a, b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(conjunction_of(&values))
            }
            AxiomExpr::Vote {
                operands,
                minimum_votes_fraction,
            } => {
                let values = operands
                    .iter()
                    .map(|op| op.preference(input, a, b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(vote_of(&values, *minimum_votes_fraction))
            }
            AxiomExpr::Cascade(ops) => {
                for op in ops {
                    let value = op.preference(input, a, b)?;
                    if value != 0.0 {
                        return Ok(value);
                    }
                }
                Ok(0.0)
            }
            AxiomExpr::Normalize(op) => Ok(sign(op.preference(input, a, b)?)),
            AxiomExpr::Negate(op) => Ok(-op.preference(input, a, b)?),
        }
    }

    fn preferences(&self, input: &I, outputs: &[O]) -> Result<PreferenceMatrix, AxiomError> {
        let n = outputs.len();
        let matrix = match self {
            AxiomExpr::Leaf(axiom) => axiom.preferences(input, outputs)?,
            AxiomExpr::Constant(value) => combine(n, &[], |_| *value),
            AxiomExpr::Sum(ops) => {
                let matrices = Self::operand_matrices(ops, input, outputs)?;
                combine(n, &matrices, |values| values.iter().sum())
            }
            AxiomExpr::Product(ops) => Self::short_circuit(
                ops,
                input,
                outputs,
                1.0,
                |current| current != 0.0,
                |current, value| if value == 0.0 { 0.0 } else { current * value },
            )?,
            AxiomExpr::Inverse(op) => {
                let inner = op.preferences(input, outputs)?;
                let has_zero = (0..n).any(|i| (0..n).any(|j| i != j && inner[(i, j)] == 0.0));
                if has_zero {
                    return Err(AxiomError::DivisionByZero { axiom: self.name() });
                }
                combine(n, &[inner], |values| 1.0 / values[0])
            }
            AxiomExpr::Conjunction(ops) => {
                let matrices = Self::operand_matrices(ops, input, outputs)?;
                combine(n, &matrices, conjunction_of)
            }
            AxiomExpr::Vote {
                operands,
                minimum_votes_fraction,
            } => {
                let matrices = Self::operand_matrices(operands, input, outputs)?;
                combine(n, &matrices, |values| {
                    vote_of(values, *minimum_votes_fraction)
                })
            }
            AxiomExpr::Cascade(ops) => Self::short_circuit(
                ops,
                input,
                outputs,
                0.0,
                |current| current == 0.0,
                |_, value| value,
            )?,
            AxiomExpr::Normalize(op) => {
                let inner = op.preferences(input, outputs)?;
                combine(n, &[inner], |values| sign(values[0]))
            }
            AxiomExpr::Negate(op) => {
                let inner = op.preferences(input, outputs)?;
                combine(n, &[inner], |values| -values[0])
            }
        };
        Ok(matrix)
    }

    fn name(&self) -> String {
        match self {
            AxiomExpr::Leaf(axiom) => axiom.name(),
            AxiomExpr::Constant(value) => format!("Uniform({value})"),
            AxiomExpr::Sum(ops) => format!("Sum({})", join_names(ops)),
            AxiomExpr::Product(ops) => format!("Product({})", join_names(ops)),
            AxiomExpr::Inverse(op) => format!("Inverse({})", op.name()),
            AxiomExpr::Conjunction(ops) => format!("And({})", join_names(ops)),
            AxiomExpr::Vote {
                operands,
                minimum_votes_fraction,
            } => format!(
                "Vote({}; min={minimum_votes_fraction})",
                join_names(operands)
            ),
            AxiomExpr::Cascade(ops) => format!("Cascade({})", join_names(ops)),
            AxiomExpr::Normalize(op) => format!("Normalize({})", op.name()),
            AxiomExpr::Negate(op) => format!("Negate({})", op.name()),
        }
    }

    fn symmetry(&self) -> Symmetry {
        match self {
            AxiomExpr::Leaf(axiom) => axiom.symmetry(),
            AxiomExpr::Constant(value) => {
                if *value == 0.0 {
                    Symmetry::Antisymmetric
                } else {
                    Symmetry::Symmetric
                }
            }
            AxiomExpr::Sum(ops) | AxiomExpr::Conjunction(ops) | AxiomExpr::Cascade(ops) => {
                Symmetry::all_of(ops.iter().map(|op| op.symmetry()))
            }
            AxiomExpr::Vote { operands, .. } => {
                Symmetry::all_of(operands.iter().map(|op| op.symmetry()))
            }
            AxiomExpr::Product(ops) => Symmetry::product_of(ops.iter().map(|op| op.symmetry())),
            AxiomExpr::Inverse(op) | AxiomExpr::Normalize(op) | AxiomExpr::Negate(op) => {
                op.symmetry()
            }
        }
    }

    fn is_cached(&self) -> bool {
        match self {
            AxiomExpr::Leaf(axiom) => axiom.is_cached(),
            _ => false,
        }
    }
}

impl<I: Sync, O: Sync> Clone for AxiomExpr<I, O> {
    fn clone(&self) -> Self {
        match self {
            AxiomExpr::Leaf(axiom) => AxiomExpr::Leaf(Arc::clone(axiom)),
            AxiomExpr::Constant(value) => AxiomExpr::Constant(*value),
            AxiomExpr::Sum(ops) => AxiomExpr::Sum(ops.clone()),
            AxiomExpr::Product(ops) => AxiomExpr::Product(ops.clone()),
            AxiomExpr::Inverse(op) => AxiomExpr::Inverse(op.clone()),
            AxiomExpr::Conjunction(ops) => AxiomExpr::Conjunction(ops.clone()),
            AxiomExpr::Vote {
                operands,
                minimum_votes_fraction,
            } => AxiomExpr::Vote {
                operands: operands.clone(),
                minimum_votes_fraction: *minimum_votes_fraction,
            },
            AxiomExpr::Cascade(ops) => AxiomExpr::Cascade(ops.clone()),
            AxiomExpr::Normalize(op) => AxiomExpr::Normalize(op.clone()),
            AxiomExpr::Negate(op) => AxiomExpr::Negate(op.clone()),
        }
    }
}

impl<I: Sync, O: Sync> fmt::Debug for AxiomExpr<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AxiomExpr({})", self.name())
    }
}

impl<I, O> Add for AxiomExpr<I, O>
where
    I: Sync + 'static,
    O: Sync + 'static,
{
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        AxiomExpr::sum([self, rhs])
    }
}

impl<I, O> Mul for AxiomExpr<I, O>
where
    I: Sync + 'static,
    O: Sync + 'static,
{
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        AxiomExpr::product([self, rhs])
    }
}

impl<I, O> Neg for AxiomExpr<I, O>
where
    I: Sync + 'static,
    O: Sync + 'static,
{
    type Output = Self;

    fn neg(self) -> Self {
        self.negate()
    }
}
