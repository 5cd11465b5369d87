#![forbid(unsafe_code)]

//! # preference-axioms
//!
//! Axiomatic reranking for retrieval results.
//!
//! An axiom is a small, explainable pairwise rule ("prefer the document with
//! more query terms", "prefer the originally higher-ranked document"). Axioms
//! compose into expressions with sums, products, votes, cascades and masks,
//! and can be memoized in a persistent preference cache. Two things can be
//! done with an axiom:
//!
//! - measure how far an existing ranking violates it ([`matrix::analyze`]);
//! - rerank so that the ranking follows it ([`rerank::kwiksort`]).
//!
//! Concrete text axioms and retrieval backends live outside this crate; they
//! implement [`Axiom`] over their own input and output types.

pub mod axiom;
pub mod cache;
pub mod matrix;
pub mod registry;
pub mod report;
pub mod rerank;
pub mod types;

pub use axiom::{
    Axiom, AxiomError, AxiomExpr, AxiomRef, Masked, Precondition, Preference, PreferenceMatrix,
    Symmetry,
};
pub use cache::{
    CacheError, CachedAxiom, MemoryPreferenceStore, PreferenceKey, PreferenceStore,
    SqlitePreferenceStore,
};
pub use matrix::{analyze, ConsistencyAnalysis, PermutationMatrix};
pub use registry::{
    axiom_from_spec, load_axiom_from_path, AxiomConfig, AxiomRegistry, AxiomRequest, AxiomSpec,
    DocumentAxiom, SpecError,
};
pub use rerank::{
    kwiksort, rerank_blocking, JsonlTraceSink, KwikSort, PartitionTrace, PivotSelection,
    PivotStrategy, RerankError, RerankOptions, Reranker, TraceError, TraceSink, TraceWorker,
};
pub use types::{CacheInput, Contents, Identified, Query, RankedDocument, Ranked};
