//! Database Test Utilities

use chrono::{Duration as ChronoDuration, Utc};
use mixplan_common::config::EngineConfig;
use mixplan_common::models::{
    ChannelConfig, HistoricalSetup, Location, ParseStatus, PerformerRequirement, SetupOrigin,
};
use mixplan_engine::db::{locations, setups};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Fresh database in a temp directory (keep the `TempDir` alive)
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = mixplan_common::db::init_database(&temp_dir.path().join("mixplan.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Default config with a short generator timeout
pub fn test_config(timeout: Duration) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.generator.timeout = timeout;
    config
}

pub async fn seed_location(pool: &SqlitePool, account_id: Uuid, name: &str) -> Location {
    let mut location = Location::new(account_id, name);
    location.venue_type = Some("hall".to_string());
    locations::insert_location(pool, &location).await.unwrap();
    location
}

/// Store a rated, generated setup at `location` created `age_days` ago
pub async fn rated_setup(
    pool: &SqlitePool,
    location: &Location,
    performers: Vec<PerformerRequirement>,
    rating: Option<u8>,
    age_days: i64,
) -> HistoricalSetup {
    let setup = HistoricalSetup {
        id: Uuid::new_v4(),
        account_id: location.account_id,
        location_id: location.id,
        event_name: Some(format!("Event {}", age_days)),
        event_date: None,
        performers,
        rating,
        notes: None,
        channel_config: ChannelConfig::from_value(Some(&json!({
            "1": {"instrument": "vocal", "mic": "Beta 58A"}
        }))),
        eq_settings: Default::default(),
        compression_settings: Default::default(),
        fx_settings: Default::default(),
        instructions: Some("Stored instructions".to_string()),
        troubleshooting_tips: None,
        corrections: BTreeMap::new(),
        origin: SetupOrigin::Generated {
            parse_status: ParseStatus::Structured,
        },
        created_at: Utc::now() - ChronoDuration::days(age_days),
    };
    setups::insert_setup(pool, &setup).await.unwrap();
    setup
}
