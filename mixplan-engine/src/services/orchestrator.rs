//! Generation Orchestrator
//!
//! Sequences matching, aggregation, the generator call and persistence for
//! one request, tracing every step in a [`GenerationRun`].
//!
//! Nothing is written until the generator has answered and its output has
//! been normalized. The new setup and its quota charge then commit in one
//! transaction, so a timeout, generator failure, cancellation or lost quota
//! race leaves storage and counters untouched.

use chrono::Utc;
use mixplan_common::config::EngineConfig;
use mixplan_common::models::{
    validate_lineup, validate_rating, CorrectionEntry, HistoricalSetup, Location, ParseStatus,
    PerformerRequirement, QuotaKind, SetupOrigin,
};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{gear, knowledge, locations, setups};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    GenerationResult, GenerationRun, GenerationState, RecommendOutcome, Recommendation,
    ReuseRequest, SetupRequest,
};
use crate::services::generator::{call_bounded, GeneratorOutput, SetupGenerator};
use crate::services::knowledge_aggregator::{AggregationInput, KnowledgeAggregator};
use crate::services::match_scorer::MatchScorer;
use crate::services::prompt_builder::{GenerationPrompt, PromptBuilder};
use crate::services::quota_gate::QuotaGate;
use crate::services::response_normalizer::ResponseNormalizer;

/// Event metadata carried onto the persisted record
struct EventMeta {
    event_name: Option<String>,
    event_date: Option<chrono::NaiveDate>,
    performers: Vec<PerformerRequirement>,
}

/// Recommendation engine entry point
pub struct GenerationOrchestrator {
    pool: SqlitePool,
    config: Arc<EngineConfig>,
    generator: Arc<dyn SetupGenerator>,
    quota: QuotaGate,
    scorer: MatchScorer,
    aggregator: KnowledgeAggregator,
    normalizer: ResponseNormalizer,
    prompts: PromptBuilder,
}

impl GenerationOrchestrator {
    pub fn new(
        pool: SqlitePool,
        config: Arc<EngineConfig>,
        generator: Arc<dyn SetupGenerator>,
    ) -> Self {
        let quota = QuotaGate::new(pool.clone(), config.plan_limits.clone());
        let prompts = PromptBuilder::new(
            config.console_description.clone(),
            config.history_prompt_limit,
        );
        Self {
            pool,
            config,
            generator,
            quota,
            scorer: MatchScorer::new(),
            aggregator: KnowledgeAggregator::new(),
            normalizer: ResponseNormalizer::new(),
            prompts,
        }
    }

    pub fn quota_gate(&self) -> &QuotaGate {
        &self.quota
    }

    /// Recommend a setup for a venue and lineup
    ///
    /// Offers a stored setup for reuse when one matches well (unless
    /// `force_generate`), otherwise generates and persists a new one.
    pub async fn recommend(
        &self,
        account_id: Uuid,
        request: SetupRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Recommendation> {
        let mut run = GenerationRun::new(account_id);
        info!(
            run_id = %run.run_id,
            account_id = %account_id,
            location_id = %request.location_id,
            performers = request.performers.len(),
            force_generate = request.force_generate,
            "Setup recommendation requested"
        );

        validate_lineup(&request.performers)?;

        let location = match locations::find_location(&self.pool, account_id, request.location_id).await? {
            Some(location) => location,
            None => {
                run.transition_to(GenerationState::NotFound);
                return Err(EngineError::NotFound(format!("Location {}", request.location_id)));
            }
        };

        let history =
            setups::history_for_location(&self.pool, account_id, location.id, None).await?;

        if !request.force_generate {
            run.transition_to(GenerationState::Matching);
            let rated: Vec<HistoricalSetup> =
                history.iter().filter(|s| s.rating.is_some()).cloned().collect();
            let matched = self.scorer.score(&request.performers, &rated);

            if matched.is_actionable() {
                if let Some(source) = matched.source {
                    run.transition_to(GenerationState::ReuseCandidate);
                    info!(
                        run_id = %run.run_id,
                        quality = %matched.quality,
                        score = matched.score,
                        source_id = %source.id,
                        "Reuse candidate found"
                    );
                    return Ok(Recommendation {
                        run,
                        outcome: RecommendOutcome::ReuseCandidate {
                            quality: matched.quality,
                            score: matched.score,
                            source,
                        },
                    });
                }
            }
            run.transition_to(GenerationState::NoMatch);
        }

        let meta = EventMeta {
            event_name: request.event_name,
            event_date: request.event_date,
            performers: request.performers,
        };
        self.generate_and_persist(run, &location, &history, meta, None, cancel)
            .await
    }

    /// Regenerate the technical fields of an existing setup
    ///
    /// The result is a new record; the refreshed setup is left untouched and
    /// excluded from its own history.
    pub async fn refresh(
        &self,
        account_id: Uuid,
        setup_id: Uuid,
        cancel: &CancellationToken,
    ) -> EngineResult<Recommendation> {
        let mut run = GenerationRun::new(account_id);
        info!(run_id = %run.run_id, account_id = %account_id, setup_id = %setup_id, "Setup refresh requested");

        let Some(source) = setups::find_setup(&self.pool, account_id, setup_id).await? else {
            run.transition_to(GenerationState::NotFound);
            return Err(EngineError::NotFound(format!("Setup {}", setup_id)));
        };
        let Some(location) =
            locations::find_location(&self.pool, account_id, source.location_id).await?
        else {
            run.transition_to(GenerationState::NotFound);
            return Err(EngineError::NotFound(format!("Location {}", source.location_id)));
        };

        let history =
            setups::history_for_location(&self.pool, account_id, location.id, Some(source.id))
                .await?;

        let meta = EventMeta {
            event_name: source.event_name.clone(),
            event_date: source.event_date,
            performers: source.performers.clone(),
        };
        self.generate_and_persist(run, &location, &history, meta, Some(&source), cancel)
            .await
    }

    /// Clone a stored setup's technical fields into a new "reused" record
    ///
    /// Consumes no quota and never calls the generator.
    pub async fn accept_reuse(
        &self,
        account_id: Uuid,
        source_id: Uuid,
        request: ReuseRequest,
    ) -> EngineResult<HistoricalSetup> {
        let source = setups::find_setup(&self.pool, account_id, source_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Setup {}", source_id)))?;

        let performers = if request.performers.is_empty() {
            source.performers.clone()
        } else {
            validate_lineup(&request.performers)?;
            request.performers
        };

        let setup = HistoricalSetup {
            id: Uuid::new_v4(),
            account_id,
            location_id: source.location_id,
            event_name: request.event_name,
            event_date: request.event_date,
            performers,
            rating: None,
            notes: None,
            channel_config: source.channel_config.clone(),
            eq_settings: source.eq_settings.clone(),
            compression_settings: source.compression_settings.clone(),
            fx_settings: source.fx_settings.clone(),
            instructions: source.instructions.clone(),
            troubleshooting_tips: source.troubleshooting_tips.clone(),
            corrections: BTreeMap::new(),
            origin: SetupOrigin::Reused { source_id },
            created_at: Utc::now(),
        };
        setups::insert_setup(&self.pool, &setup).await?;

        info!(account_id = %account_id, setup_id = %setup.id, source_id = %source_id, "Setup reused");
        Ok(setup)
    }

    /// Rate a setup 1-5, optionally replacing its notes
    pub async fn rate_setup(
        &self,
        account_id: Uuid,
        setup_id: Uuid,
        rating: i64,
        notes: Option<String>,
    ) -> EngineResult<HistoricalSetup> {
        let rating = validate_rating(rating)?;
        if !setups::update_rating(&self.pool, account_id, setup_id, rating, notes.as_deref()).await? {
            return Err(EngineError::NotFound(format!("Setup {}", setup_id)));
        }
        info!(account_id = %account_id, setup_id = %setup_id, rating, "Setup rated");

        setups::find_setup(&self.pool, account_id, setup_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Setup {}", setup_id)))
    }

    /// Merge per-channel corrections into a rated setup
    pub async fn record_corrections(
        &self,
        account_id: Uuid,
        setup_id: Uuid,
        corrections: BTreeMap<String, CorrectionEntry>,
    ) -> EngineResult<HistoricalSetup> {
        let mut setup = setups::find_setup(&self.pool, account_id, setup_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Setup {}", setup_id)))?;

        setup.apply_corrections(corrections)?;
        if !setups::update_corrections(&self.pool, account_id, setup_id, &setup.corrections).await? {
            return Err(EngineError::Validation(
                "Corrections can only be logged on a rated setup".to_string(),
            ));
        }

        info!(
            account_id = %account_id,
            setup_id = %setup_id,
            channels = setup.corrections.len(),
            "Corrections recorded"
        );
        Ok(setup)
    }

    // ========================================================================
    // Generation path
    // ========================================================================

    async fn generate_and_persist(
        &self,
        mut run: GenerationRun,
        location: &Location,
        history: &[HistoricalSetup],
        meta: EventMeta,
        refreshing: Option<&HistoricalSetup>,
        cancel: &CancellationToken,
    ) -> EngineResult<Recommendation> {
        let account_id = run.account_id;
        run.transition_to(GenerationState::Generating);

        if let Err(e) = self.quota.check_allowed(account_id, QuotaKind::Generation).await {
            run.transition_to(GenerationState::QuotaExceeded);
            return Err(e);
        }

        let (gear_items, library, instruments, venues) = tokio::try_join!(
            gear::list_gear_with_loans(&self.pool, account_id),
            knowledge::list_hardware(&self.pool, account_id),
            knowledge::list_instrument_profiles(&self.pool, account_id),
            knowledge::list_venue_profiles(&self.pool, account_id),
        )?;

        let context = self.aggregator.aggregate(AggregationInput {
            location,
            performers: &meta.performers,
            gear: &gear_items,
            knowledge_library: &library,
            instrument_profiles: &instruments,
            venue_profiles: &venues,
            history,
        });
        let prompt = self.prompts.build(location, &meta.performers, &context, refreshing);

        let output = match self.call_generator(&prompt, cancel).await {
            Ok(output) => output,
            Err(e) => {
                let state = match e {
                    EngineError::Cancelled => GenerationState::Cancelled,
                    _ => GenerationState::Failed,
                };
                run.transition_to(state);
                error!(run_id = %run.run_id, error = %e, retryable = e.is_retryable(), "Generation aborted");
                return Err(e);
            }
        };

        run.transition_to(GenerationState::Parsing);
        let mut result = self.normalizer.normalize(&output.text);
        run.transition_to(match result.parse_status {
            ParseStatus::Structured => GenerationState::Success,
            ParseStatus::Degraded => GenerationState::Degraded,
        });

        let origin = match refreshing {
            Some(source) => {
                result.instructions = format!(
                    "[Refreshed {} from setup {}]\n\n{}",
                    Utc::now().format("%Y-%m-%d %H:%M UTC"),
                    source.id,
                    result.instructions
                );
                SetupOrigin::Refreshed {
                    source_id: source.id,
                    parse_status: result.parse_status,
                }
            }
            None => SetupOrigin::Generated {
                parse_status: result.parse_status,
            },
        };

        let setup = build_setup(account_id, location.id, meta, &result, origin);
        if let Err(e) = self.persist(&setup, cancel).await {
            let state = match e {
                EngineError::Cancelled => GenerationState::Cancelled,
                EngineError::QuotaExceeded { .. } => GenerationState::QuotaExceeded,
                _ => GenerationState::Failed,
            };
            run.transition_to(state);
            warn!(run_id = %run.run_id, error = %e, "Generated setup not persisted");
            return Err(e);
        }
        run.transition_to(GenerationState::Persisted);

        info!(
            run_id = %run.run_id,
            setup_id = %setup.id,
            parse_status = %result.parse_status,
            elapsed_ms = output.elapsed.as_millis() as u64,
            "Setup generated"
        );

        Ok(Recommendation {
            run,
            outcome: RecommendOutcome::Generated {
                setup,
                result,
                elapsed: output.elapsed,
            },
        })
    }

    async fn call_generator(
        &self,
        prompt: &GenerationPrompt,
        cancel: &CancellationToken,
    ) -> EngineResult<GeneratorOutput> {
        let user = prompt.user_prompt();
        call_bounded(
            self.generator.as_ref(),
            prompt.system_prompt(),
            &user,
            self.config.generator.timeout,
            cancel,
        )
        .await
    }

    /// Insert the setup and charge quota atomically
    async fn persist(&self, setup: &HistoricalSetup, cancel: &CancellationToken) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        setups::insert_setup(&mut *tx, setup).await?;
        self.quota
            .record_usage_in(&mut *tx, setup.account_id, QuotaKind::Generation)
            .await?;

        // Last point a cancellation can still undo the request
        if cancel.is_cancelled() {
            tx.rollback().await?;
            return Err(EngineError::Cancelled);
        }
        tx.commit().await?;
        Ok(())
    }
}

fn build_setup(
    account_id: Uuid,
    location_id: Uuid,
    meta: EventMeta,
    result: &GenerationResult,
    origin: SetupOrigin,
) -> HistoricalSetup {
    HistoricalSetup {
        id: Uuid::new_v4(),
        account_id,
        location_id,
        event_name: meta.event_name,
        event_date: meta.event_date,
        performers: meta.performers,
        rating: None,
        notes: None,
        channel_config: result.channel_config.clone(),
        eq_settings: result.eq_settings.clone(),
        compression_settings: result.compression_settings.clone(),
        fx_settings: result.fx_settings.clone(),
        instructions: Some(result.instructions.clone()),
        troubleshooting_tips: Some(result.troubleshooting_tips.clone()),
        corrections: BTreeMap::new(),
        origin,
        created_at: Utc::now(),
    }
}
