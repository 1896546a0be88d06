//! mixplan-engine - Setup Recommendation Engine
//!
//! Given a venue and a performer lineup, either offers a stored setup for
//! reuse or generates a new mixer configuration from accumulated knowledge,
//! under per-account usage quotas.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{EngineError, EngineResult};
pub use crate::services::GenerationOrchestrator;
