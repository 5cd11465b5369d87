use std::sync::Arc;
use std::time::Duration;

use preference_axioms::{
    rerank_blocking, Axiom, AxiomError, AxiomRef, AxiomRegistry, KwikSort, Preference, Query,
    RankedDocument, RerankError, RerankOptions,
};

struct SlowAxiom {
    delay: Duration,
}

impl Axiom<Query, RankedDocument> for SlowAxiom {
    fn preference(
        &self,
        _input: &Query,
        a: &RankedDocument,
        b: &RankedDocument,
    ) -> Result<Preference, AxiomError> {
        std::thread::sleep(self.delay);
        Ok(b.rank as f64 - a.rank as f64)
    }

    fn name(&self) -> String {
        "SLOW".to_string()
    }
}

fn docs(n: usize) -> Vec<RankedDocument> {
    (0..n)
        .map(|idx| RankedDocument::new(format!("doc-{idx}"), idx + 1, 0.0))
        .collect()
}

#[tokio::test]
async fn rerank_blocking_returns_reranked_documents() {
    let registry = AxiomRegistry::default();
    let sorter = Arc::new(KwikSort::from_options(
        registry.get("ID").unwrap(),
        RerankOptions::default().with_seed(11),
    ));
    let input = vec![
        RankedDocument::new("b", 1, 0.0),
        RankedDocument::new("a", 2, 0.0),
        RankedDocument::new("c", 3, 0.0),
    ];

    let out = rerank_blocking(sorter, Query::new("q1", "rust"), input, None, None)
        .await
        .unwrap();
    let ids: Vec<&str> = out.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);
    assert_eq!(out[0].rank, 1);
    assert_eq!(out[0].score, 3.0);
}

#[tokio::test]
async fn rerank_blocking_times_out() {
    let slow: AxiomRef<Query, RankedDocument> = Arc::new(SlowAxiom {
        delay: Duration::from_millis(200),
    });
    let sorter = Arc::new(KwikSort::new(slow));
    let err = rerank_blocking(
        sorter,
        Query::new("q1", "rust"),
        docs(4),
        None,
        Some(Duration::from_millis(10)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RerankError::Timeout(limit) if limit == Duration::from_millis(10)));
}

#[tokio::test]
async fn rerank_blocking_finishes_within_generous_timeout() {
    let slow: AxiomRef<Query, RankedDocument> = Arc::new(SlowAxiom {
        delay: Duration::from_millis(1),
    });
    let sorter = Arc::new(KwikSort::new(slow));
    let out = rerank_blocking(
        sorter,
        Query::new("q1", "rust"),
        docs(5),
        None,
        Some(Duration::from_secs(30)),
    )
    .await
    .unwrap();
    let ranks: Vec<usize> = out.iter().map(|d| d.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    assert_eq!(out[0].id, "doc-0");
}
