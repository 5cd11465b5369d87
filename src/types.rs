//! Inputs and outputs exchanged between axioms, the cache and the reranker.
//!
//! Axioms are generic over what they compare. The traits here are the narrow
//! capabilities the core needs from those values: a stable key for the input,
//! a stable identifier for every output, and an original rank when reranking.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Input that can key cache entries.
pub trait CacheInput {
    /// Stable key; equal inputs must produce equal keys across processes.
    fn cache_key(&self) -> Cow<'_, str>;
}

impl CacheInput for String {
    fn cache_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl CacheInput for &str {
    fn cache_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(*self)
    }
}

/// Output with a stable identifier.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Output carrying its position in the original ranking.
pub trait Ranked: Identified {
    /// 1-based rank in the ranking being analyzed or reordered.
    fn rank(&self) -> usize;

    /// Copy of this output placed at a new rank with a new score.
    fn with_rank(self, rank: usize, score: f64) -> Self
    where
        Self: Sized;
}

/// Output with text contents, used by length preconditions.
pub trait Contents {
    fn contents(&self) -> &str;
}

/// Query context for a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Query {
    /// Stable identifier (cache key).
    pub id: String,
    /// Query text.
    #[serde(default)]
    pub text: String,
}

impl Query {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

impl CacheInput for Query {
    fn cache_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.id.as_str())
    }
}

/// A retrieved document at a position in a ranking.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RankedDocument {
    /// Stable identifier for the document.
    pub id: String,
    /// 1-based rank.
    pub rank: usize,
    /// Retrieval score (higher is better).
    #[serde(default)]
    pub score: f64,
    /// Optional text contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RankedDocument {
    pub fn new(id: impl Into<String>, rank: usize, score: f64) -> Self {
        Self {
            id: id.into(),
            rank,
            score,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

impl Identified for RankedDocument {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Ranked for RankedDocument {
    fn rank(&self) -> usize {
        self.rank
    }

    fn with_rank(mut self, rank: usize, score: f64) -> Self {
        self.rank = rank;
        self.score = score;
        self
    }
}

impl Contents for RankedDocument {
    fn contents(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}
