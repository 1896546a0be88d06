//! Generation run state machine
//!
//! REQUESTED → MATCHING → {REUSE_CANDIDATE | NO_MATCH} → GENERATING → PARSING
//! → {SUCCESS | DEGRADED} → PERSISTED
//!
//! NOT_FOUND and QUOTA_EXCEEDED end a run early; FAILED and CANCELLED end a
//! run during generation with nothing persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generation run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationState {
    Requested,
    Matching,
    ReuseCandidate,
    NoMatch,
    Generating,
    Parsing,
    Success,
    Degraded,
    Persisted,
    NotFound,
    QuotaExceeded,
    /// Generator failed or timed out
    Failed,
    Cancelled,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationState::ReuseCandidate
                | GenerationState::Persisted
                | GenerationState::NotFound
                | GenerationState::QuotaExceeded
                | GenerationState::Failed
                | GenerationState::Cancelled
        )
    }
}

/// One recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub run_id: Uuid,
    pub old_state: GenerationState,
    pub new_state: GenerationState,
    pub transitioned_at: DateTime<Utc>,
}

/// In-memory trace of one recommend/refresh request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRun {
    pub run_id: Uuid,
    pub account_id: Uuid,
    pub state: GenerationState,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl GenerationRun {
    pub fn new(account_id: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            account_id,
            state: GenerationState::Requested,
            transitions: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`, recording the transition
    pub fn transition_to(&mut self, new_state: GenerationState) -> &StateTransition {
        let now = Utc::now();
        tracing::debug!(
            run_id = %self.run_id,
            from = ?self.state,
            to = ?new_state,
            "Generation state transition"
        );
        self.transitions.push(StateTransition {
            run_id: self.run_id,
            old_state: self.state,
            new_state,
            transitioned_at: now,
        });
        self.state = new_state;
        if new_state.is_terminal() {
            self.ended_at = Some(now);
        }
        &self.transitions[self.transitions.len() - 1]
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// States visited, starting with REQUESTED
    pub fn path(&self) -> Vec<GenerationState> {
        std::iter::once(GenerationState::Requested)
            .chain(self.transitions.iter().map(|t| t.new_state))
            .collect()
    }
}
