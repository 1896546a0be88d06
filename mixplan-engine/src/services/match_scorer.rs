//! Match Scorer Service
//!
//! Scores how well a requested lineup matches each stored lineup and picks
//! the best candidate. Pure computation: no storage or network access.
//!
//! # Scoring
//! Lineups are reduced to multisets (normalized performer type → total count):
//! - identical multisets → exact, 1.0
//! - same types, different counts → similar, 0.8
//! - type overlap ≥ 0.5 → partial, overlap × 0.6
//! - otherwise → none, 0.0
//!
//! The rating adjusts the score for ranking only:
//! `adjusted = score × (0.8 + rating × 0.04)`, unrated counting as 3.

use mixplan_common::models::{HistoricalSetup, PerformerRequirement};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{MatchQuality, MatchResult};

const EXACT_SCORE: f64 = 1.0;
const SIMILAR_SCORE: f64 = 0.8;
const PARTIAL_WEIGHT: f64 = 0.6;
const PARTIAL_MIN_OVERLAP: f64 = 0.5;
const RATING_BASE: f64 = 0.8;
const RATING_STEP: f64 = 0.04;
const DEFAULT_RATING: u8 = 3;

/// Lineup multiset: normalized performer type → total count
pub type Lineup = BTreeMap<String, u64>;

/// Reduce lineup rows to a multiset
///
/// Counts for repeated types are summed. Rows with an empty type or a zero
/// count are malformed and ignored.
pub fn lineup_multiset(rows: &[PerformerRequirement]) -> Lineup {
    let mut lineup = Lineup::new();
    for row in rows {
        let key = row.type_key();
        if key.is_empty() || row.count == 0 {
            continue;
        }
        *lineup.entry(key).or_insert(0) += u64::from(row.count);
    }
    lineup
}

/// Classify one candidate lineup against the request
pub fn classify(request: &Lineup, candidate: &Lineup) -> (MatchQuality, f64) {
    if request.is_empty() || candidate.is_empty() {
        return (MatchQuality::None, 0.0);
    }
    if request == candidate {
        return (MatchQuality::Exact, EXACT_SCORE);
    }

    let request_keys: BTreeSet<&String> = request.keys().collect();
    let candidate_keys: BTreeSet<&String> = candidate.keys().collect();
    if request_keys == candidate_keys {
        return (MatchQuality::Similar, SIMILAR_SCORE);
    }

    let shared = request_keys.intersection(&candidate_keys).count() as f64;
    let overlap = shared / request_keys.len().max(candidate_keys.len()) as f64;
    if overlap >= PARTIAL_MIN_OVERLAP {
        (MatchQuality::Partial, overlap * PARTIAL_WEIGHT)
    } else {
        (MatchQuality::None, 0.0)
    }
}

/// Rating-weighted score used to rank candidates
pub fn adjusted_score(score: f64, rating: Option<u8>) -> f64 {
    let rating = f64::from(rating.unwrap_or(DEFAULT_RATING));
    score * (RATING_BASE + rating * RATING_STEP)
}

/// Candidate ranking: rating desc (unrated last), then newest first
pub fn history_order(a: &HistoricalSetup, b: &HistoricalSetup) -> Ordering {
    match (a.rating, b.rating) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Lineup match scorer
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchScorer;

impl MatchScorer {
    pub fn new() -> Self {
        Self
    }

    /// Best match for `request` among `candidates`
    ///
    /// Candidates are ranked with [`history_order`] first; among equal
    /// adjusted scores the earliest ranked candidate wins.
    pub fn score(
        &self,
        request: &[PerformerRequirement],
        candidates: &[HistoricalSetup],
    ) -> MatchResult {
        let wanted = lineup_multiset(request);
        if wanted.is_empty() {
            return MatchResult::none();
        }

        let mut ranked: Vec<&HistoricalSetup> = candidates.iter().collect();
        ranked.sort_by(|a, b| history_order(a, b));

        let mut best = MatchResult::none();
        let mut best_candidate: Option<&HistoricalSetup> = None;
        for candidate in ranked {
            let (quality, score) = classify(&wanted, &lineup_multiset(&candidate.performers));
            let adjusted = adjusted_score(score, candidate.rating);
            if adjusted > best.adjusted_score {
                best.quality = quality;
                best.score = score;
                best.adjusted_score = adjusted;
                best_candidate = Some(candidate);
            }
        }

        best.source = best_candidate.cloned();
        tracing::debug!(
            quality = %best.quality,
            score = best.score,
            adjusted = best.adjusted_score,
            candidates = candidates.len(),
            "Lineup match scored"
        );
        best
    }
}
