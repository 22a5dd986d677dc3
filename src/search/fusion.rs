//! Reciprocal Rank Fusion.
//!
//! RRF(d) = Σ 1 / (k + rank_i(d))
//! where k is a smoothing constant (typically 60) and rank_i(d) is the
//! 1-based rank of document d in source list i.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::retrieval::{Candidate, SourceBackend};

use super::FusedResult;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Fuse per-source ranked lists into one ranking.
///
/// Sources are visited in [`SourceBackend`] order and documents are
/// accumulated in a sorted map, so the floating-point sums and the output do
/// not depend on the iteration order of `lists`. A document repeated within
/// one source counts once, at its best rank.
///
/// Output is ordered by fused score descending, then by best rank, then by
/// doc id.
pub fn rrf_fuse(lists: &HashMap<SourceBackend, Vec<Candidate>>, k: f32) -> Vec<FusedResult> {
    let mut sources: Vec<&SourceBackend> = lists.keys().collect();
    sources.sort();

    let mut fused: BTreeMap<&str, FusedResult> = BTreeMap::new();

    for source in sources {
        let mut ranked: Vec<&Candidate> = lists[source].iter().collect();
        ranked.sort_by_key(|c| c.rank);

        let mut seen = HashSet::new();
        for candidate in ranked {
            if !seen.insert(candidate.doc_id.as_str()) {
                continue;
            }
            let contribution = 1.0 / (k + candidate.rank as f32);
            let entry = fused
                .entry(candidate.doc_id.as_str())
                .or_insert_with(|| FusedResult {
                    doc_id: candidate.doc_id.clone(),
                    fused_score: 0.0,
                    contributing_sources: BTreeSet::new(),
                    best_rank: candidate.rank,
                });
            entry.fused_score += contribution;
            entry.contributing_sources.insert(*source);
            entry.best_rank = entry.best_rank.min(candidate.rank);
        }
    }

    let mut results: Vec<FusedResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    results
}
