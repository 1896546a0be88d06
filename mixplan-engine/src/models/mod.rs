//! Engine data models
//!
//! Persistent entities live in `mixplan_common::models`; these types only
//! exist for the duration of one request.

pub mod generation;
pub mod generation_state;

pub use generation::{
    GenerationResult, MatchQuality, MatchResult, RecommendOutcome, Recommendation, ReuseRequest,
    SetupRequest,
};
pub use generation_state::{GenerationRun, GenerationState, StateTransition};
