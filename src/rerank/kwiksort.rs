//! KwikSort: quicksort driven by an axiom.
//!
//! The axiom acts as a three-valued comparator. Candidates it prefers over
//! the pivot go left, candidates it rejects go right, and candidates it has
//! no opinion about keep their original relative order to the pivot. With
//! an axiom that never expresses a preference the result is the original
//! ranking.
//!
//! Partitions are processed from an explicit work stack over a single index
//! buffer, so deep rankings cannot overflow the call stack.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::axiom::{Axiom, AxiomError, AxiomRef, Preference};
use crate::types::Ranked;

use super::options::RerankOptions;
use super::pivot::PivotSelection;
use super::trace::{now_epoch_ms, Placement, PartitionTrace, TraceError, TraceSink};

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error(
        "cannot order {candidate_id} against pivot {pivot_id}: \
         no preference and both have original rank {rank}"
    )]
    UnorderableTie {
        pivot_id: String,
        candidate_id: String,
        rank: usize,
    },
    #[error("pivot selection returned index {index} for {len} candidates")]
    InvalidPivot { index: usize, len: usize },
    #[error(transparent)]
    Axiom(#[from] AxiomError),
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
    #[error("rerank timed out after {0:?}")]
    Timeout(Duration),
    #[error("rerank task failed: {0}")]
    Join(String),
}

/// Anything that reorders a ranking for an input.
pub trait Reranker<I, O> {
    /// Reordered copy of `outputs` with ranks 1..N and scores N..1.
    fn rerank(&self, input: &I, outputs: &[O]) -> Result<Vec<O>, RerankError>;
}

/// Owned KwikSort configuration: an axiom, a pivot strategy and options.
pub struct KwikSort<I: Sync, O: Sync> {
    axiom: AxiomRef<I, O>,
    pivot: Arc<dyn PivotSelection<I, O>>,
    options: RerankOptions,
}

impl<I, O> KwikSort<I, O>
where
    I: Sync + 'static,
    O: Sync + 'static,
{
    pub fn new(axiom: AxiomRef<I, O>) -> Self {
        Self::from_options(axiom, RerankOptions::default())
    }

    pub fn from_options(axiom: AxiomRef<I, O>, options: RerankOptions) -> Self {
        Self {
            axiom,
            pivot: Arc::new(options.pivot),
            options,
        }
    }

    /// Replace the pivot strategy, e.g. with a domain-specific one.
    pub fn with_pivot(mut self, pivot: impl PivotSelection<I, O> + 'static) -> Self {
        self.pivot = Arc::new(pivot);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.options.rng_seed = Some(seed);
        self
    }
}

impl<I: Sync, O: Sync> KwikSort<I, O> {
    pub fn axiom(&self) -> &AxiomRef<I, O> {
        &self.axiom
    }

    pub fn options(&self) -> &RerankOptions {
        &self.options
    }
}

impl<I, O> KwikSort<I, O>
where
    I: Sync,
    O: Ranked + Clone + Sync,
{
    /// Rerank, recording every partition decision to `trace` when given.
    pub fn rerank_with_trace(
        &self,
        input: &I,
        outputs: &[O],
        trace: Option<&dyn TraceSink>,
    ) -> Result<Vec<O>, RerankError> {
        run(
            self.axiom.as_ref(),
            self.pivot.as_ref(),
            &self.options,
            input,
            outputs,
            trace,
        )
    }
}

impl<I, O> Reranker<I, O> for KwikSort<I, O>
where
    I: Sync,
    O: Ranked + Clone + Sync,
{
    fn rerank(&self, input: &I, outputs: &[O]) -> Result<Vec<O>, RerankError> {
        self.rerank_with_trace(input, outputs, None)
    }
}

/// Rerank `outputs` with a borrowed axiom and the pivot strategy named in
/// `options`.
pub fn kwiksort<I, O, A>(
    axiom: &A,
    input: &I,
    outputs: &[O],
    options: &RerankOptions,
) -> Result<Vec<O>, RerankError>
where
    I: Sync,
    O: Ranked + Clone + Sync,
    A: Axiom<I, O> + ?Sized,
{
    run(axiom, &options.pivot, options, input, outputs, None)
}

fn run<I, O, A>(
    axiom: &A,
    pivot: &dyn PivotSelection<I, O>,
    options: &RerankOptions,
    input: &I,
    outputs: &[O],
    sink: Option<&dyn TraceSink>,
) -> Result<Vec<O>, RerankError>
where
    I: Sync,
    O: Ranked + Clone + Sync,
    A: Axiom<I, O> + ?Sized,
{
    let n = outputs.len();
    let axiom_name = axiom.name();
    debug!(
        axiom = %axiom_name,
        outputs = n,
        seed = ?options.rng_seed,
        pivot = %options.pivot,
        "kwiksort started"
    );

    let mut rng = match options.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut order: Vec<usize> = (0..n).collect();
    let mut stack: Vec<(usize, usize)> = vec![(0, n)];
    let mut comparisons = 0usize;
    let mut left: Vec<usize> = Vec::with_capacity(n);
    let mut right: Vec<usize> = Vec::with_capacity(n);

    while let Some((start, end)) = stack.pop() {
        if end - start < 2 {
            continue;
        }

        let segment = &order[start..end];
        let candidates: Vec<&O> = segment.iter().map(|&idx| &outputs[idx]).collect();
        let pivot_pos = pivot.select_pivot(input, &candidates, &mut rng);
        if pivot_pos >= segment.len() {
            return Err(RerankError::InvalidPivot {
                index: pivot_pos,
                len: segment.len(),
            });
        }
        let pivot_idx = segment[pivot_pos];
        let others: Vec<usize> = segment
            .iter()
            .enumerate()
            .filter(|(pos, _)| *pos != pivot_pos)
            .map(|(_, &idx)| idx)
            .collect();

        trace!(
            start,
            end,
            pivot = %outputs[pivot_idx].id(),
            "partitioning"
        );

        let preferences = partition_preferences(axiom, options, input, outputs, pivot_idx, &others)?;

        left.clear();
        right.clear();
        let pivot_out = &outputs[pivot_idx];
        for (&candidate_idx, &preference) in others.iter().zip(&preferences) {
            let candidate = &outputs[candidate_idx];
            let (placement, tie_broken) = place(preference, candidate, pivot_out)?;
            match placement {
                Placement::Left => left.push(candidate_idx),
                Placement::Right => right.push(candidate_idx),
            }
            if let Some(sink) = sink {
                sink.record(PartitionTrace {
                    timestamp_ms: now_epoch_ms(),
                    comparison_index: comparisons,
                    axiom: axiom_name.clone(),
                    pivot_id: pivot_out.id().to_string(),
                    candidate_id: candidate.id().to_string(),
                    pivot_rank: pivot_out.rank(),
                    candidate_rank: candidate.rank(),
                    preference,
                    placement,
                    tie_broken,
                })?;
            }
            comparisons += 1;
        }

        let split = start + left.len();
        order[start..split].copy_from_slice(&left);
        order[split] = pivot_idx;
        order[split + 1..end].copy_from_slice(&right);

        stack.push((split + 1, end));
        stack.push((start, split));
    }

    debug!(axiom = %axiom_name, comparisons, "kwiksort finished");

    Ok(order
        .into_iter()
        .enumerate()
        .map(|(pos, idx)| outputs[idx].clone().with_rank(pos + 1, (n - pos) as f64))
        .collect())
}

/// Side of the pivot for one candidate, and whether the original ranks
/// decided it.
///
/// NaN preferences are treated as no preference.
fn place<O: Ranked>(
    preference: Preference,
    candidate: &O,
    pivot: &O,
) -> Result<(Placement, bool), RerankError> {
    if preference > 0.0 {
        return Ok((Placement::Left, false));
    }
    if preference < 0.0 {
        return Ok((Placement::Right, false));
    }
    match candidate.rank().cmp(&pivot.rank()) {
        std::cmp::Ordering::Less => Ok((Placement::Left, true)),
        std::cmp::Ordering::Greater => Ok((Placement::Right, true)),
        std::cmp::Ordering::Equal => Err(RerankError::UnorderableTie {
            pivot_id: pivot.id().to_string(),
            candidate_id: candidate.id().to_string(),
            rank: candidate.rank(),
        }),
    }
}

/// `preference(input, candidate, pivot)` for every candidate of a partition.
fn partition_preferences<I, O, A>(
    axiom: &A,
    options: &RerankOptions,
    input: &I,
    outputs: &[O],
    pivot_idx: usize,
    candidates: &[usize],
) -> Result<Vec<Preference>, AxiomError>
where
    I: Sync,
    O: Sync,
    A: Axiom<I, O> + ?Sized,
{
    let pivot = &outputs[pivot_idx];
    let eval = |&idx: &usize| axiom.preference(input, &outputs[idx], pivot);

    #[cfg(feature = "parallel")]
    if candidates.len() >= options.parallel_threshold {
        return candidates.par_iter().map(eval).collect();
    }
    #[cfg(not(feature = "parallel"))]
    let _ = options;

    candidates.iter().map(eval).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::axiom::{compare_ids, AxiomExpr, OriginalRank, StrictlyGreater};
    use crate::rerank::pivot::{FirstPivot, PivotStrategy};
    use crate::rerank::trace::MemoryTraceSink;
    use crate::types::RankedDocument;

    fn docs(ids: &[&str]) -> Vec<RankedDocument> {
        ids.iter()
            .enumerate()
            .map(|(idx, id)| RankedDocument::new(*id, idx + 1, 0.5))
            .collect()
    }

    fn ids(docs: &[RankedDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    fn seeded(seed: u64) -> RerankOptions {
        RerankOptions::default().with_seed(seed)
    }

    #[test]
    fn empty_input_returns_empty() {
        let zero: AxiomExpr<&'static str, RankedDocument> = AxiomExpr::constant(0.0);
        let out = kwiksort(&zero, &"q", &[], &seeded(1)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn no_opinion_keeps_original_order_and_reassigns_scores() {
        let zero: AxiomExpr<&'static str, RankedDocument> = AxiomExpr::constant(0.0);
        let input = docs(&["A", "B", "C"]);
        for seed in 0..16 {
            let out = kwiksort(&zero, &"q", &input, &seeded(seed)).unwrap();
            assert_eq!(ids(&out), vec!["A", "B", "C"]);
            assert_eq!(out.iter().map(|d| d.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
            assert_eq!(out.iter().map(|d| d.score).collect::<Vec<_>>(), vec![3.0, 2.0, 1.0]);
        }
    }

    #[test]
    fn id_axiom_orders_by_descending_id() {
        let by_id = StrictlyGreater::new("ID", compare_ids::<RankedDocument>);
        let input = docs(&["b", "a", "c"]);
        for pivot in [
            PivotStrategy::Random,
            PivotStrategy::First,
            PivotStrategy::Last,
            PivotStrategy::Middle,
        ] {
            let options = seeded(3).with_pivot(pivot);
            let out = kwiksort(&by_id, &"q", &input, &options).unwrap();
            assert_eq!(ids(&out), vec!["c", "b", "a"]);
        }
    }

    #[test]
    fn original_rank_axiom_restores_shuffled_ranking() {
        let mut input = docs(&["a", "b", "c", "d", "e", "f"]);
        input.reverse();
        let out = kwiksort(&OriginalRank::new(), &"q", &input, &seeded(9)).unwrap();
        assert_eq!(ids(&out), vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn equal_rank_without_preference_is_an_error() {
        let zero: AxiomExpr<&'static str, RankedDocument> = AxiomExpr::constant(0.0);
        let input = vec![
            RankedDocument::new("x", 1, 0.0),
            RankedDocument::new("y", 1, 0.0),
        ];
        let err = kwiksort(&zero, &"q", &input, &seeded(0)).unwrap_err();
        match err {
            RerankError::UnorderableTie { rank, .. } => assert_eq!(rank, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn axiom_errors_abort_the_rerank() {
        let zero: AxiomExpr<&'static str, RankedDocument> = AxiomExpr::constant(0.0);
        let input = docs(&["a", "b"]);
        let err = kwiksort(&zero.inverse(), &"q", &input, &seeded(0)).unwrap_err();
        assert!(matches!(err, RerankError::Axiom(AxiomError::DivisionByZero { .. })));
    }

    struct OutOfRange;

    impl PivotSelection<&'static str, RankedDocument> for OutOfRange {
        fn select_pivot(
            &self,
            _input: &&'static str,
            candidates: &[&RankedDocument],
            _rng: &mut dyn rand::RngCore,
        ) -> usize {
            candidates.len()
        }
    }

    #[test]
    fn custom_pivot_out_of_range_is_rejected() {
        let sorter = KwikSort::new(AxiomExpr::constant(1.0).into_ref()).with_pivot(OutOfRange);
        let err = sorter.rerank(&"q", &docs(&["a", "b"])).unwrap_err();
        assert!(matches!(err, RerankError::InvalidPivot { index: 2, len: 2 }));
    }

    #[test]
    fn first_pivot_compares_each_candidate_against_pivot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let counting = StrictlyGreater::new("COUNT", move |a: &RankedDocument, b: &RankedDocument| {
            counter.fetch_add(1, Ordering::SeqCst);
            b.rank.partial_cmp(&a.rank)
        });
        let sorter = KwikSort::new(AxiomExpr::leaf(counting).into_ref()).with_pivot(FirstPivot);
        let out = sorter.rerank(&"q", &docs(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(ids(&out), vec!["a", "b", "c", "d"]);
        // Already sorted with first pivot: 3 + 2 + 1 comparisons.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn trace_records_every_partition_decision() {
        let sink = MemoryTraceSink::new();
        let zero: AxiomExpr<&'static str, RankedDocument> = AxiomExpr::constant(0.0);
        let sorter = KwikSort::new(zero.into_ref()).with_pivot(FirstPivot);
        sorter
            .rerank_with_trace(&"q", &docs(&["a", "b", "c"]), Some(&sink))
            .unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.tie_broken));
        assert!(events.iter().all(|e| e.placement == Placement::Right));
        assert_eq!(events[0].pivot_id, "a");
        assert_eq!(
            events.iter().map(|e| e.comparison_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let noisy: AxiomExpr<&'static str, RankedDocument> = AxiomExpr::sum([
            AxiomExpr::leaf(StrictlyGreater::new("ID", compare_ids::<RankedDocument>)),
            AxiomExpr::leaf(OriginalRank::new()),
        ]);
        let input = docs(&["e", "c", "a", "d", "b", "f", "g"]);
        let first = kwiksort(&noisy, &"q", &input, &seeded(42)).unwrap();
        let second = kwiksort(&noisy, &"q", &input, &seeded(42)).unwrap();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn large_partitions_agree_with_sequential_evaluation() {
        let by_id = StrictlyGreater::new("ID", compare_ids::<RankedDocument>);
        let names: Vec<String> = (0..200).map(|i| format!("doc-{i:03}")).collect();
        let input: Vec<RankedDocument> = names
            .iter()
            .enumerate()
            .map(|(idx, id)| RankedDocument::new(id.as_str(), idx + 1, 0.0))
            .collect();
        let mut options = seeded(5);
        options.parallel_threshold = 1;
        let parallel = kwiksort(&by_id, &"q", &input, &options).unwrap();
        options.parallel_threshold = usize::MAX;
        let sequential = kwiksort(&by_id, &"q", &input, &options).unwrap();
        assert_eq!(ids(&parallel), ids(&sequential));
        assert_eq!(parallel[0].id, "doc-199");
    }
}
