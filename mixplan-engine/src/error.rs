//! Error types for the recommendation engine
//!
//! Every failure a caller can see maps onto one caller-facing outcome name
//! (see [`EngineError::outcome`]); degraded parses are not errors and never
//! appear here.

use mixplan_common::models::{Plan, QuotaKind};
use std::time::Duration;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request, rejected before any side effect
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Venue or setup absent, or not owned by the requester
    #[error("Not found: {0}")]
    NotFound(String),

    /// Usage limit reached for the current period
    #[error("{kind} quota exceeded on {plan} plan ({used}/{limit} used this period)")]
    QuotaExceeded {
        kind: QuotaKind,
        plan: Plan,
        used: i64,
        limit: i64,
    },

    /// Generator did not answer within the configured bound
    #[error("Generator timed out after {}s; please retry", .after.as_secs())]
    GeneratorTimeout { after: Duration },

    /// Generator unreachable or returned an error
    #[error("Generator unavailable: {message}; please retry")]
    Generator { message: String },

    /// Caller aborted the request before anything was persisted
    #[error("Request cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(mixplan_common::Error),
}

impl From<mixplan_common::Error> for EngineError {
    fn from(err: mixplan_common::Error) -> Self {
        match err {
            mixplan_common::Error::InvalidInput(msg) => EngineError::Validation(msg),
            mixplan_common::Error::NotFound(msg) => EngineError::NotFound(msg),
            other => EngineError::Common(other),
        }
    }
}

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::GeneratorTimeout { .. } | EngineError::Generator { .. }
        )
    }

    /// Caller-facing outcome name
    pub fn outcome(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "invalid_request",
            EngineError::NotFound(_) => "venue_not_found",
            EngineError::QuotaExceeded { .. } => "quota_exceeded",
            EngineError::GeneratorTimeout { .. } | EngineError::Generator { .. } => {
                "generator_unavailable"
            }
            EngineError::Cancelled => "cancelled",
            EngineError::Database(_) | EngineError::Common(_) => "internal_error",
        }
    }
}
