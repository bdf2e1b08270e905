//! Deterministic merge of per-query candidate batches.

use std::collections::HashSet;

use crate::core::dedup::DedupStore;
use crate::core::types::Candidate;

/// Merge batches in the order given, keeping platform rank inside each batch.
///
/// Drops empty ids, ids already engaged, and repeats within the merged set
/// (first occurrence wins). Stops once `max` candidates are kept.
pub fn merge_candidates<I>(batches: I, dedup: &DedupStore, max: usize) -> Vec<Candidate>
where
    I: IntoIterator<Item = Vec<Candidate>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for batch in batches {
        for candidate in batch {
            if merged.len() >= max {
                return merged;
            }
            if candidate.id.trim().is_empty() || dedup.contains(&candidate.id) {
                continue;
            }
            if !seen.insert(candidate.id.clone()) {
                continue;
            }
            merged.push(candidate);
        }
    }
    merged
}
