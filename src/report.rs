//! Report generation for consistency analyses.

use serde::Serialize;

use crate::matrix::ConsistencyAnalysis;
use crate::registry::AxiomRequest;

#[derive(Debug, Clone, Serialize)]
pub struct ReportOptions {
    /// Number of most-permuted documents to list.
    pub top_n: usize,
    /// Also list documents without any permutation.
    pub include_consistent: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_n: 10,
            include_consistent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub request_hash: String,
    pub query_id: String,
    pub axiom: String,
    pub documents: usize,
    pub consistency: f64,
    pub total_permutations: usize,
    pub most_permuted: Vec<ReportDocument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub id: String,
    pub rank: usize,
    pub permutations: usize,
    pub frequency: f64,
}

pub fn build_report(
    req: &AxiomRequest,
    analysis: &ConsistencyAnalysis,
    opts: &ReportOptions,
) -> Result<ConsistencyReport, serde_json::Error> {
    let mut documents: Vec<ReportDocument> = req
        .documents
        .iter()
        .zip(analysis.permutation_counts.iter())
        .zip(analysis.permutation_frequency.iter())
        .filter(|((_, count), _)| opts.include_consistent || **count > 0)
        .map(|((doc, count), frequency)| ReportDocument {
            id: doc.id.clone(),
            rank: doc.rank,
            permutations: *count,
            frequency: *frequency,
        })
        .collect();
    // Stable: equal counts keep the original order.
    documents.sort_by(|a, b| b.permutations.cmp(&a.permutations));
    documents.truncate(opts.top_n);

    Ok(ConsistencyReport {
        request_hash: hash_request(req)?,
        query_id: req.query.id.clone(),
        axiom: analysis.axiom.clone(),
        documents: analysis.ids.len(),
        consistency: analysis.consistency,
        total_permutations: analysis.permutation_counts.iter().sum(),
        most_permuted: documents,
    })
}

pub fn render_report_markdown(report: &ConsistencyReport) -> String {
    let mut out = String::new();
    out.push_str("# Axiom Consistency Report\n\n");
    out.push_str(&format!("- Request hash: `{}`\n", report.request_hash));
    out.push_str(&format!("- Query: `{}`\n", report.query_id));
    out.push_str(&format!("- Axiom: `{}`\n", report.axiom));
    out.push_str(&format!("- Documents: {}\n", report.documents));
    out.push_str(&format!("- Consistency: {:.4}\n", report.consistency));
    out.push_str(&format!(
        "- Permuted pairs: {}\n",
        report.total_permutations
    ));

    out.push_str("\n## Most Permuted Documents\n\n");
    if report.most_permuted.is_empty() {
        out.push_str("_The ranking agrees with the axiom on every pair._\n");
    }
    for doc in &report.most_permuted {
        out.push_str(&format!(
            "- {} (rank {}, permutations {}, frequency {:.3})\n",
            doc.id, doc.rank, doc.permutations, doc.frequency
        ));
    }

    out
}

fn hash_request(req: &AxiomRequest) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(req)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
