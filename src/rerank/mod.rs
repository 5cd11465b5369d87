//! Axiom-driven reranking.
//!
//! [`kwiksort`] reorders a ranking so that it agrees with an axiom wherever
//! the axiom has an opinion, and keeps the original order elsewhere.
//! [`KwikSort`] bundles an axiom with a pivot strategy and options for
//! repeated use, and [`rerank_blocking`] runs one from async code.

pub mod blocking;
pub mod kwiksort;
pub mod options;
pub mod pivot;
pub mod trace;

pub use blocking::rerank_blocking;
pub use kwiksort::{kwiksort, KwikSort, RerankError, Reranker};
pub use options::{RerankOptions, DEFAULT_PARALLEL_THRESHOLD};
pub use pivot::{FirstPivot, LastPivot, MiddlePivot, PivotSelection, PivotStrategy, RandomPivot};
pub use trace::{
    JsonlTraceSink, MemoryTraceSink, PartitionTrace, Placement, TraceError,
    TraceSink, TraceWorker,
};
