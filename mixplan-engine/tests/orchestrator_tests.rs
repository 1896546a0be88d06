//! Integration tests for the generation orchestrator
//!
//! Each test runs against its own temp SQLite database with a scripted
//! generator in place of the external service.

mod helpers;

use helpers::{create_test_db, rated_setup, seed_location, structured_response, test_config};
use helpers::{Script, ScriptedGenerator};
use mixplan_common::models::{CorrectionEntry, ParseStatus, PerformerRequirement, SetupOrigin};
use mixplan_engine::db::setups;
use mixplan_engine::models::{GenerationState, MatchQuality, RecommendOutcome, ReuseRequest, SetupRequest};
use mixplan_engine::{EngineError, GenerationOrchestrator};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn duo() -> Vec<PerformerRequirement> {
    vec![
        PerformerRequirement::new("vocal", 1),
        PerformerRequirement::new("tabla", 1),
    ]
}

fn request(location_id: Uuid, performers: Vec<PerformerRequirement>) -> SetupRequest {
    SetupRequest {
        location_id,
        performers,
        event_name: Some("Charity night".to_string()),
        event_date: None,
        force_generate: false,
    }
}

fn orchestrator(
    pool: &sqlx::SqlitePool,
    script: Script,
    timeout: Duration,
) -> (GenerationOrchestrator, Arc<ScriptedGenerator>) {
    let generator = Arc::new(ScriptedGenerator::new(script));
    let orchestrator = GenerationOrchestrator::new(
        pool.clone(),
        Arc::new(test_config(timeout)),
        generator.clone(),
    );
    (orchestrator, generator)
}

// ============================================================================
// Matching
// ============================================================================

#[tokio::test]
async fn test_exact_match_offers_reuse_without_generating() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Community hall").await;
    let stored = rated_setup(&pool, &location, duo(), Some(5), 3).await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let recommendation = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap();

    match &recommendation.outcome {
        RecommendOutcome::ReuseCandidate { quality, score, source } => {
            assert_eq!(*quality, MatchQuality::Exact);
            assert_eq!(*score, 1.0);
            assert_eq!(source.id, stored.id);
        }
        other => panic!("expected reuse candidate, got {:?}", other),
    }
    assert_eq!(recommendation.outcome.outcome(), "reuse_candidate_found");
    assert_eq!(
        recommendation.run.path(),
        vec![
            GenerationState::Requested,
            GenerationState::Matching,
            GenerationState::ReuseCandidate
        ]
    );
    assert_eq!(generator.calls(), 0);

    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 0);
}

#[tokio::test]
async fn test_unrated_history_is_not_a_reuse_candidate() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Gurdwara hall").await;
    rated_setup(&pool, &location, duo(), None, 1).await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let recommendation = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(recommendation.outcome, RecommendOutcome::Generated { .. }));
    assert!(recommendation.run.path().contains(&GenerationState::NoMatch));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_force_generate_skips_matching() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Church").await;
    rated_setup(&pool, &location, duo(), Some(5), 3).await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let mut req = request(location.id, duo());
    req.force_generate = true;
    let recommendation = orchestrator
        .recommend(account, req, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(generator.calls(), 1);
    assert!(!recommendation.run.path().contains(&GenerationState::Matching));
    assert_eq!(recommendation.outcome.outcome(), "generation_succeeded");
}

// ============================================================================
// Generation
// ============================================================================

#[tokio::test]
async fn test_structured_generation_is_persisted_and_charged() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Community hall").await;

    let (orchestrator, _generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let recommendation = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap();

    let RecommendOutcome::Generated { setup, result, .. } = &recommendation.outcome else {
        panic!("expected generated outcome");
    };
    assert_eq!(result.parse_status, ParseStatus::Structured);
    assert_eq!(setup.channel_config.channels["2"].mic.as_deref(), Some("SM57"));
    assert_eq!(setup.performers, duo());
    assert_eq!(setup.event_name.as_deref(), Some("Charity night"));
    assert_eq!(
        setup.origin,
        SetupOrigin::Generated {
            parse_status: ParseStatus::Structured
        }
    );
    assert_eq!(recommendation.run.state, GenerationState::Persisted);
    assert!(recommendation.run.path().contains(&GenerationState::Success));

    let stored = setups::find_setup(&pool, account, setup.id).await.unwrap().unwrap();
    assert_eq!(stored.channel_config, setup.channel_config);
    assert_eq!(stored.eq_settings, setup.eq_settings);
    assert_eq!(stored.instructions, setup.instructions);
    assert_eq!(stored.origin, setup.origin);

    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 1);
}

#[tokio::test]
async fn test_degraded_response_keeps_raw_text() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Park stage").await;
    let raw = "Keep the vocals warm and the tabla bright. No JSON today.";

    let (orchestrator, _generator) =
        orchestrator(&pool, Script::Respond(raw.to_string()), Duration::from_secs(5));
    let recommendation = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(recommendation.outcome.outcome(), "generation_degraded");
    let RecommendOutcome::Generated { setup, result, .. } = recommendation.outcome else {
        panic!("expected generated outcome");
    };
    assert_eq!(result.instructions, raw);
    assert_eq!(setup.instructions.as_deref(), Some(raw));
    assert!(setup.channel_config.is_empty());
    assert_eq!(setup.origin.parse_status(), Some(ParseStatus::Degraded));

    // Degraded results still consume quota
    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 1);
}

#[tokio::test]
async fn test_prompt_carries_lineup_and_history() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Temple hall").await;
    // Partial match only, so generation proceeds with history in the prompt
    rated_setup(&pool, &location, vec![PerformerRequirement::new("vocal", 1)], Some(2), 4).await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap();

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Temple hall"));
    assert!(prompts[0].contains("**tabla** (count: 1)"));
    assert!(prompts[0].contains("## Past Setups That Needed Improvement"));
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_missing_or_foreign_location_is_not_found() {
    let (_dir, pool) = create_test_db().await;
    let owner = Uuid::new_v4();
    let location = seed_location(&pool, owner, "Private hall").await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));

    for location_id in [location.id, Uuid::new_v4()] {
        let err = orchestrator
            .recommend(Uuid::new_v4(), request(location_id, duo()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)), "got {:?}", err);
        assert_eq!(err.outcome(), "venue_not_found");
    }
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_empty_lineup_is_rejected() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;

    let (orchestrator, _generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let err = orchestrator
        .recommend(account, request(location.id, Vec::new()), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_quota_denied_before_generator_call() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;

    let mut config = test_config(Duration::from_secs(5));
    config.plan_limits.free.generations = 0;
    let generator = Arc::new(ScriptedGenerator::new(Script::Respond(structured_response())));
    let orchestrator = GenerationOrchestrator::new(pool.clone(), Arc::new(config), generator.clone());

    let err = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        EngineError::QuotaExceeded { used, limit, .. } => {
            assert_eq!(used, 0);
            assert_eq!(limit, 0);
        }
        other => panic!("expected quota error, got {:?}", other),
    }
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_timeout_is_retryable_and_leaves_nothing_behind() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;

    let (orchestrator, generator) = orchestrator(
        &pool,
        Script::Slow(Duration::from_secs(10), structured_response()),
        Duration::from_millis(100),
    );
    let err = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::GeneratorTimeout { .. }), "got {:?}", err);
    assert!(err.is_retryable());
    assert_eq!(err.outcome(), "generator_unavailable");
    assert_eq!(generator.calls(), 1);

    let history = setups::history_for_location(&pool, account, location.id, None).await.unwrap();
    assert!(history.is_empty());
    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 0);

    // Retrying against a responsive generator succeeds
    let (retry, _) = orchestrator_pair(&pool);
    retry
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap();
    let quota = retry.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 1);
}

fn orchestrator_pair(pool: &sqlx::SqlitePool) -> (GenerationOrchestrator, Arc<ScriptedGenerator>) {
    orchestrator(pool, Script::Respond(structured_response()), Duration::from_secs(5))
}

#[tokio::test]
async fn test_generator_error_is_retryable() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;

    let (orchestrator, _generator) = orchestrator(
        &pool,
        Script::Fail("overloaded".to_string()),
        Duration::from_secs(5),
    );
    let err = orchestrator
        .recommend(account, request(location.id, duo()), &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        EngineError::Generator { message } => assert!(message.contains("overloaded")),
        other => panic!("expected generator error, got {:?}", other),
    }
    assert!(err.is_retryable());
    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 0);
}

#[tokio::test]
async fn test_cancellation_leaves_no_setup_and_no_usage() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;

    let (orchestrator, generator) = orchestrator(
        &pool,
        Script::Slow(Duration::from_secs(10), structured_response()),
        Duration::from_secs(30),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = orchestrator
        .recommend(account, request(location.id, duo()), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled), "got {:?}", err);
    assert_eq!(err.outcome(), "cancelled");
    assert_eq!(generator.calls(), 1);

    let history = setups::history_for_location(&pool, account, location.id, None).await.unwrap();
    assert!(history.is_empty());
    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 0);
}

#[tokio::test]
async fn test_concurrent_generations_respect_limit() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;

    let mut config = test_config(Duration::from_secs(5));
    config.plan_limits.free.generations = 1;
    let generator = Arc::new(ScriptedGenerator::new(Script::Slow(
        Duration::from_millis(50),
        structured_response(),
    )));
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        pool.clone(),
        Arc::new(config),
        generator.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orchestrator = orchestrator.clone();
        let mut req = request(location.id, duo());
        req.force_generate = true;
        handles.push(tokio::spawn(async move {
            orchestrator.recommend(account, req, &CancellationToken::new()).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::QuotaExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, 1);
    let history = setups::history_for_location(&pool, account, location.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 1);
}

// ============================================================================
// Refresh and reuse
// ============================================================================

#[tokio::test]
async fn test_refresh_creates_new_record_and_excludes_source_history() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;
    let source = rated_setup(&pool, &location, duo(), Some(5), 3).await;
    rated_setup(&pool, &location, duo(), Some(4), 10).await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let recommendation = orchestrator
        .refresh(account, source.id, &CancellationToken::new())
        .await
        .unwrap();

    // Refresh never stops at a reuse candidate
    assert!(!recommendation.run.path().contains(&GenerationState::Matching));
    let RecommendOutcome::Generated { setup, .. } = &recommendation.outcome else {
        panic!("expected generated outcome");
    };
    assert_ne!(setup.id, source.id);
    assert_eq!(setup.event_name, source.event_name);
    assert_eq!(setup.performers, source.performers);
    assert_eq!(
        setup.origin,
        SetupOrigin::Refreshed {
            source_id: source.id,
            parse_status: ParseStatus::Structured
        }
    );
    assert!(setup.instructions.as_deref().unwrap().starts_with("[Refreshed "));

    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("### Event 10"));
    assert!(!prompt.contains("### Event 3"));

    let unchanged = setups::find_setup(&pool, account, source.id).await.unwrap().unwrap();
    assert_eq!(unchanged.instructions, source.instructions);
    assert_eq!(unchanged.channel_config, source.channel_config);
    assert_eq!(unchanged.origin, source.origin);
}

#[tokio::test]
async fn test_refresh_unknown_setup_is_not_found() {
    let (_dir, pool) = create_test_db().await;
    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));

    let err = orchestrator
        .refresh(Uuid::new_v4(), Uuid::new_v4(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_accept_reuse_clones_settings_without_quota() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;
    let source = rated_setup(&pool, &location, duo(), Some(5), 3).await;

    let (orchestrator, generator) =
        orchestrator(&pool, Script::Respond(structured_response()), Duration::from_secs(5));
    let reused = orchestrator
        .accept_reuse(
            account,
            source.id,
            ReuseRequest {
                event_name: Some("Winter mela".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(reused.origin, SetupOrigin::Reused { source_id: source.id });
    assert_eq!(reused.channel_config, source.channel_config);
    assert_eq!(reused.instructions, source.instructions);
    assert_eq!(reused.performers, source.performers);
    assert_eq!(reused.event_name.as_deref(), Some("Winter mela"));
    assert!(reused.rating.is_none());
    assert_eq!(generator.calls(), 0);

    let quota = orchestrator.quota_gate().status(account).await.unwrap();
    assert_eq!(quota.generation_used, 0);
    assert!(setups::find_setup(&pool, account, reused.id).await.unwrap().is_some());
}

// ============================================================================
// Ratings and corrections
// ============================================================================

#[tokio::test]
async fn test_rate_setup_validates_range() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;
    let setup = rated_setup(&pool, &location, duo(), None, 1).await;

    let (orchestrator, _) = orchestrator_pair(&pool);

    for bad in [0, 6, -1] {
        let err = orchestrator.rate_setup(account, setup.id, bad, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "rating {}", bad);
    }

    let rated = orchestrator
        .rate_setup(account, setup.id, 4, Some("Monitors rang".to_string()))
        .await
        .unwrap();
    assert_eq!(rated.rating, Some(4));
    assert_eq!(rated.notes.as_deref(), Some("Monitors rang"));

    let err = orchestrator.rate_setup(Uuid::new_v4(), setup.id, 4, None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_corrections_require_rating_and_merge_per_channel() {
    let (_dir, pool) = create_test_db().await;
    let account = Uuid::new_v4();
    let location = seed_location(&pool, account, "Hall").await;
    let setup = rated_setup(&pool, &location, duo(), None, 1).await;

    let (orchestrator, _) = orchestrator_pair(&pool);

    let mut first = BTreeMap::new();
    first.insert(
        "1".to_string(),
        CorrectionEntry {
            instrument: Some("vocal".to_string()),
            gain_change: Some("-3 dB".to_string()),
            ..Default::default()
        },
    );

    let err = orchestrator
        .record_corrections(account, setup.id, first.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    orchestrator.rate_setup(account, setup.id, 3, None).await.unwrap();
    orchestrator.record_corrections(account, setup.id, first).await.unwrap();

    let mut second = BTreeMap::new();
    second.insert(
        "2".to_string(),
        CorrectionEntry {
            instrument: Some("tabla".to_string()),
            notes: Some("Move mic closer to the dayan".to_string()),
            ..Default::default()
        },
    );
    let updated = orchestrator.record_corrections(account, setup.id, second).await.unwrap();
    assert_eq!(updated.corrections.len(), 2);

    let stored = setups::find_setup(&pool, account, setup.id).await.unwrap().unwrap();
    assert_eq!(stored.corrections["1"].gain_change.as_deref(), Some("-3 dB"));
    assert_eq!(stored.corrections["2"].instrument.as_deref(), Some("tabla"));
}
