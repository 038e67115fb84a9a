use std::collections::HashMap;

use crate::models::{CandidateJob, Provenance};

#[derive(Debug, Clone, Default)]
pub struct DedupeResult {
    /// One record per fingerprint, in first-discovery order.
    pub unique: Vec<CandidateJob>,
    /// Records that lost to a same-fingerprint record, kept for auditing.
    pub duplicates: Vec<CandidateJob>,
}

/// Collapse candidates sharing a fingerprint.
///
/// The first record seen holds the slot unless a later one has strictly higher
/// confidence, which then replaces it. The survivor's `sources` gathers the
/// provenance of every record it absorbed.
pub fn dedupe(candidates: Vec<CandidateJob>) -> DedupeResult {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<CandidateJob> = Vec::new();
    let mut duplicates = Vec::new();

    for candidate in candidates {
        let key = candidate.fingerprint();
        let Some(&index) = slots.get(&key) else {
            slots.insert(key, unique.len());
            unique.push(candidate);
            continue;
        };

        let kept = &mut unique[index];
        let loser = if candidate.confidence > kept.confidence {
            let mut candidate = candidate;
            merge_provenance(&mut candidate.sources, &kept.sources);
            std::mem::replace(kept, candidate)
        } else {
            merge_provenance(&mut kept.sources, &candidate.sources);
            candidate
        };
        duplicates.push(loser);
    }

    tracing::debug!(
        unique = unique.len(),
        duplicates = duplicates.len(),
        "Deduplicated candidates"
    );
    DedupeResult { unique, duplicates }
}

fn merge_provenance(into: &mut Vec<Provenance>, from: &[Provenance]) {
    for provenance in from {
        if !into.contains(provenance) {
            into.push(provenance.clone());
        }
    }
}
