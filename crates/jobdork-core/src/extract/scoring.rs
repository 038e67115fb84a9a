use crate::config::{ConfidenceWeights, SourceKind};

use super::heuristics::{has_hiring_language, has_job_keyword};

/// Signals the confidence score is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub kind: SourceKind,
    pub title: &'a str,
    pub description: &'a str,
    /// The posting URL is hosted on a reputable job board or ATS.
    pub reputable_host: bool,
}

/// Base confidence for the source kind plus fixed bonuses, clamped to `[0, 1]`.
pub fn confidence(weights: &ConfidenceWeights, inputs: ScoreInputs<'_>) -> f64 {
    let mut score = match inputs.kind {
        SourceKind::SearchEngine => weights.search_engine_base,
        SourceKind::JobBoard => weights.job_board_base,
    };
    if has_job_keyword(inputs.title) {
        score += weights.job_keyword_in_title;
    }
    if inputs.reputable_host {
        score += weights.reputable_board;
    }
    if has_hiring_language(inputs.description) {
        score += weights.hiring_language;
    }
    if inputs.description.chars().count() >= weights.rich_description_len {
        score += weights.rich_description;
    }
    score.clamp(0.0, 1.0)
}
