//! Database initialization
//!
//! Every table is created idempotently, so opening an existing database is
//! the same call as creating a new one.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Lock wait before SQLite reports `SQLITE_BUSY`
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database at `db_path` and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are applied to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_locations_table(pool).await?;
    create_gear_table(pool).await?;
    create_gear_loans_table(pool).await?;
    create_learned_hardware_table(pool).await?;
    create_instrument_profiles_table(pool).await?;
    create_venue_type_profiles_table(pool).await?;
    create_setups_table(pool).await?;
    create_quotas_table(pool).await?;
    Ok(())
}

pub async fn create_locations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            name TEXT NOT NULL,
            venue_type TEXT,
            notes TEXT,
            speaker_setup TEXT,
            lr_geq_cuts TEXT,
            monitor_geq_cuts TEXT,
            room_notes TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_account ON locations(account_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_gear_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gear (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            brand TEXT,
            model TEXT,
            serial_number TEXT,
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 0),
            specs TEXT,
            default_settings TEXT,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_gear_account ON gear(account_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_gear_loans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gear_loans (
            id TEXT PRIMARY KEY,
            gear_id TEXT NOT NULL REFERENCES gear(id) ON DELETE CASCADE,
            borrower_name TEXT NOT NULL,
            quantity_loaned INTEGER NOT NULL CHECK (quantity_loaned >= 1),
            loan_date TEXT NOT NULL,
            expected_return_date TEXT,
            returned INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_gear_loans_gear ON gear_loans(gear_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_learned_hardware_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learned_hardware (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            hardware_type TEXT NOT NULL,
            brand TEXT NOT NULL,
            model TEXT NOT NULL,
            characteristics TEXT,
            best_for TEXT,
            settings_by_source TEXT,
            knowledge_entry TEXT,
            user_notes TEXT,
            UNIQUE (account_id, brand, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_instrument_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instrument_profiles (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            name TEXT NOT NULL,
            value_key TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'other',
            description TEXT,
            mic_recommendations TEXT,
            eq_settings TEXT,
            compression_settings TEXT,
            fx_recommendations TEXT,
            mixing_notes TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            UNIQUE (account_id, value_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_venue_type_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS venue_type_profiles (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            name TEXT NOT NULL,
            value_key TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'other',
            description TEXT,
            acoustic_characteristics TEXT,
            eq_strategy TEXT,
            fx_approach TEXT,
            compression_philosophy TEXT,
            monitoring_notes TEXT,
            special_considerations TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            UNIQUE (account_id, value_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Historical setups
///
/// Technical columns are written once; `rating`, `notes` and `corrections`
/// are the only columns ever updated.
pub async fn create_setups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS setups (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
            event_name TEXT,
            event_date TEXT,
            performers TEXT NOT NULL,
            rating INTEGER CHECK (rating IS NULL OR rating BETWEEN 1 AND 5),
            notes TEXT,
            channel_config TEXT,
            eq_settings TEXT,
            compression_settings TEXT,
            fx_settings TEXT,
            instructions TEXT,
            troubleshooting_tips TEXT,
            corrections TEXT,
            origin TEXT NOT NULL DEFAULT 'generated',
            source_setup_id TEXT,
            parse_status TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_setups_location_rating ON setups(location_id, rating)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-account usage counters for the current billing period
pub async fn create_quotas_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quotas (
            account_id TEXT PRIMARY KEY,
            plan TEXT NOT NULL DEFAULT 'free',
            generation_used INTEGER NOT NULL DEFAULT 0 CHECK (generation_used >= 0),
            learning_used INTEGER NOT NULL DEFAULT 0 CHECK (learning_used >= 0),
            period_start TEXT,
            period_end TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
