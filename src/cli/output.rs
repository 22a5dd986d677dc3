//! Output formatting for the `search` command.
//!
//! Results are printed as a human-readable table, as JSON, or as TREC run
//! lines for offline evaluation.

use tributary::SearchResponse;

/// Run tag written in the last TREC column.
pub const TREC_TAG: &str = "tributary";

/// How search results are printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    /// TREC run lines for the given query id.
    Trec(String),
}

/// Print search results.
pub fn print_search_results(
    response: &SearchResponse,
    format: &OutputFormat,
) -> serde_json::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Trec(query_id) => {
            for line in trec_lines(query_id, response, TREC_TAG) {
                println!("{}", line);
            }
        }
        OutputFormat::Table => print_table(response),
    }
    Ok(())
}

fn print_table(response: &SearchResponse) {
    println!(
        "Found {} results ({:.1}ms, mode {})\n",
        response.results.len(),
        response.processing_time_ms,
        response.stats.mode
    );
    if let Some(expanded) = &response.expanded_query {
        println!("Expanded query: {}\n", expanded);
    }

    for (i, r) in response.results.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, r.score, r.doc_id);
        if !r.snippet.is_empty() {
            println!("   \"{}\"\n", r.snippet.replace('\n', " "));
        }
    }

    if response.results.is_empty() {
        println!("No results found.");
    }

    for failure in &response.stats.backend_failures {
        eprintln!(
            "warning: backend {} failed ({}): {}",
            failure.backend, failure.kind, failure.message
        );
    }
    if let Some(error) = &response.stats.rerank_error {
        eprintln!("warning: reranking skipped: {}", error);
    }
}

/// Format results as `<qid> Q0 <doc> <rank> <score> <tag>` lines.
pub fn trec_lines(query_id: &str, response: &SearchResponse, tag: &str) -> Vec<String> {
    response
        .results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{} Q0 {} {} {:.6} {}", query_id, r.doc_id, i + 1, r.score, tag))
        .collect()
}
