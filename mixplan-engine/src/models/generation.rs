//! Requests, match results and generation outcomes

use chrono::NaiveDate;
use mixplan_common::models::{
    ChannelConfig, CompressionSettings, EqSettings, FxSettings, HistoricalSetup, ParseStatus,
    PerformerRequirement,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::GenerationRun;

/// How closely a historical lineup matches a requested one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    None,
    Partial,
    Similar,
    Exact,
}

impl MatchQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchQuality::None => "none",
            MatchQuality::Partial => "partial",
            MatchQuality::Similar => "similar",
            MatchQuality::Exact => "exact",
        }
    }
}

impl fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best candidate found by the match scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Decided by the branch that matched, not derived from `score`
    pub quality: MatchQuality,
    /// Raw branch score in [0, 1]
    pub score: f64,
    /// Score after the rating adjustment; used only for ranking candidates
    pub adjusted_score: f64,
    pub source: Option<HistoricalSetup>,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            quality: MatchQuality::None,
            score: 0.0,
            adjusted_score: 0.0,
            source: None,
        }
    }

    /// Exact and similar matches are offered to the caller for reuse
    pub fn is_actionable(&self) -> bool {
        matches!(self.quality, MatchQuality::Exact | MatchQuality::Similar) && self.source.is_some()
    }
}

/// Structured form of one generator response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub channel_config: ChannelConfig,
    pub eq_settings: EqSettings,
    pub compression_settings: CompressionSettings,
    pub fx_settings: FxSettings,
    pub instructions: String,
    pub troubleshooting_tips: String,
    pub parse_status: ParseStatus,
}

/// A new-setup request for one venue and lineup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupRequest {
    pub location_id: Uuid,
    pub performers: Vec<PerformerRequirement>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub event_date: Option<NaiveDate>,
    /// Skip matching and always call the generator
    #[serde(default)]
    pub force_generate: bool,
}

/// Metadata for the record created when a reuse candidate is accepted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReuseRequest {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub event_date: Option<NaiveDate>,
    /// Lineup for the new record; empty keeps the source lineup
    #[serde(default)]
    pub performers: Vec<PerformerRequirement>,
}

/// What a recommend or refresh request produced
#[derive(Debug, Clone)]
pub enum RecommendOutcome {
    /// A stored setup can be reused; nothing was generated or charged
    ReuseCandidate {
        quality: MatchQuality,
        score: f64,
        source: HistoricalSetup,
    },
    /// A new setup was generated and persisted
    Generated {
        setup: HistoricalSetup,
        result: GenerationResult,
        elapsed: Duration,
    },
}

impl RecommendOutcome {
    /// Caller-facing outcome name
    pub fn outcome(&self) -> &'static str {
        match self {
            RecommendOutcome::ReuseCandidate { .. } => "reuse_candidate_found",
            RecommendOutcome::Generated { result, .. } => match result.parse_status {
                ParseStatus::Structured => "generation_succeeded",
                ParseStatus::Degraded => "generation_degraded",
            },
        }
    }
}

/// Outcome plus the state trace that produced it
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub run: GenerationRun,
    pub outcome: RecommendOutcome,
}
