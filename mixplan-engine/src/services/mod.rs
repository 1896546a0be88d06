//! Recommendation engine services
//!
//! Pure components (scorer, aggregator, normalizer, prompt builder) take
//! plain values; the quota gate, orchestrator and learner own a pool handle.

pub mod generator;
pub mod knowledge_aggregator;
pub mod knowledge_learner;
pub mod match_scorer;
pub mod orchestrator;
pub mod prompt_builder;
pub mod quota_gate;
pub mod response_normalizer;

pub use generator::{
    call_bounded, GeneratorError, GeneratorOutput, MessagesApiGenerator, SetupGenerator,
};
pub use knowledge_aggregator::{
    AggregationInput, Anomaly, GearKnowledge, InstrumentGuidance, KnowledgeAggregator,
    KnowledgeContext,
};
pub use knowledge_learner::{KnowledgeLearner, LearnHardwareRequest, LearnProfileRequest, Learned};
pub use match_scorer::MatchScorer;
pub use orchestrator::GenerationOrchestrator;
pub use prompt_builder::{GenerationPrompt, PromptBuilder};
pub use quota_gate::{BillingEvent, QuotaGate};
pub use response_normalizer::ResponseNormalizer;
