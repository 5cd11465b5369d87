//! Leaf axioms that need nothing beyond the outputs themselves.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use crate::types::{Identified, Ranked};

use super::{Axiom, AxiomError, Preference, Symmetry};

fn from_ordering(ordering: Option<Ordering>) -> Preference {
    match ordering {
        Some(Ordering::Greater) => 1.0,
        Some(Ordering::Less) => -1.0,
        Some(Ordering::Equal) | None => 0.0,
    }
}

/// Prefers the output that was ranked higher (smaller rank) originally.
///
/// Reranking with this axiom alone reproduces the original ranking.
pub struct OriginalRank<O> {
    _marker: PhantomData<fn(&O)>,
}

impl<O> OriginalRank<O> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<O> Default for OriginalRank<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> fmt::Debug for OriginalRank<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OriginalRank")
    }
}

impl<I: Sync, O: Ranked + Sync> Axiom<I, O> for OriginalRank<O> {
    fn preference(&self, _input: &I, a: &O, b: &O) -> Result<Preference, AxiomError> {
        // Lower rank wins, so compare b against a.
        Ok(from_ordering(Some(b.rank().cmp(&a.rank()))))
    }

    fn name(&self) -> String {
        "ORIG".to_string()
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Antisymmetric
    }
}

/// Prefers the output that compares strictly greater under `compare`.
///
/// Returns 1 when `compare(a, b)` is `Greater`, -1 when `Less`, and 0 when
/// equal or incomparable.
pub struct StrictlyGreater<O, F> {
    name: String,
    compare: F,
    _marker: PhantomData<fn(&O)>,
}

impl<O, F> StrictlyGreater<O, F>
where
    F: Fn(&O, &O) -> Option<Ordering>,
{
    pub fn new(name: impl Into<String>, compare: F) -> Self {
        Self {
            name: name.into(),
            compare,
            _marker: PhantomData,
        }
    }
}

impl<O, F> fmt::Debug for StrictlyGreater<O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrictlyGreater")
            .field("name", &self.name)
            .finish()
    }
}

impl<I, O, F> Axiom<I, O> for StrictlyGreater<O, F>
where
    I: Sync,
    O: Sync,
    F: Fn(&O, &O) -> Option<Ordering> + Send + Sync,
{
    fn preference(&self, _input: &I, a: &O, b: &O) -> Result<Preference, AxiomError> {
        Ok(from_ordering((self.compare)(a, b)))
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Antisymmetric
    }
}

/// Lexicographic comparison of output identifiers.
pub fn compare_ids<O: Identified>(a: &O, b: &O) -> Option<Ordering> {
    Some(a.id().cmp(b.id()))
}
