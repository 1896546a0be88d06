//! Hardware knowledge library and acoustic profile storage
//!
//! Upserts are generic over the executor so a learned entry can share a
//! transaction with quota accounting.

use mixplan_common::models::{HardwareKnowledge, InstrumentProfile, VenueProfile};
use mixplan_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use super::{opt_json_text, parse_json, parse_uuid};

// ============================================================================
// Hardware library
// ============================================================================

/// Insert or replace the library entry for (account, brand, model)
pub async fn upsert_hardware<'e, E>(executor: E, entry: &HardwareKnowledge) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO learned_hardware (
            id, account_id, hardware_type, brand, model, characteristics,
            best_for, settings_by_source, knowledge_entry, user_notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id, brand, model) DO UPDATE SET
            hardware_type = excluded.hardware_type,
            characteristics = excluded.characteristics,
            best_for = excluded.best_for,
            settings_by_source = excluded.settings_by_source,
            knowledge_entry = excluded.knowledge_entry,
            user_notes = excluded.user_notes
        "#,
    )
    .bind(entry.id.to_string())
    .bind(entry.account_id.to_string())
    .bind(&entry.hardware_type)
    .bind(&entry.brand)
    .bind(&entry.model)
    .bind(&entry.characteristics)
    .bind(&entry.best_for)
    .bind(opt_json_text(entry.settings_by_source.as_ref())?)
    .bind(&entry.knowledge_entry)
    .bind(&entry.user_notes)
    .execute(executor)
    .await?;

    Ok(())
}

/// Library entry for (account, brand, model), if learned
pub async fn find_hardware(
    pool: &SqlitePool,
    account_id: Uuid,
    brand: &str,
    model: &str,
) -> Result<Option<HardwareKnowledge>> {
    let row = sqlx::query(
        r#"
        SELECT id, account_id, hardware_type, brand, model, characteristics,
               best_for, settings_by_source, knowledge_entry, user_notes
        FROM learned_hardware
        WHERE account_id = ? AND brand = ? AND model = ?
        "#,
    )
    .bind(account_id.to_string())
    .bind(brand)
    .bind(model)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(hardware_from_row).transpose()
}

pub async fn list_hardware(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<HardwareKnowledge>> {
    let rows = sqlx::query(
        r#"
        SELECT id, account_id, hardware_type, brand, model, characteristics,
               best_for, settings_by_source, knowledge_entry, user_notes
        FROM learned_hardware
        WHERE account_id = ?
        ORDER BY hardware_type, brand, model
        "#,
    )
    .bind(account_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(decode_rows(&rows, "learned_hardware", hardware_from_row))
}

fn hardware_from_row(row: &SqliteRow) -> Result<HardwareKnowledge> {
    Ok(HardwareKnowledge {
        id: parse_uuid(row.get("id"), "learned_hardware.id")?,
        account_id: parse_uuid(row.get("account_id"), "learned_hardware.account_id")?,
        hardware_type: row.get("hardware_type"),
        brand: row.get("brand"),
        model: row.get("model"),
        characteristics: row.get("characteristics"),
        best_for: row.get("best_for"),
        settings_by_source: parse_json(row.get("settings_by_source"))?,
        knowledge_entry: row.get("knowledge_entry"),
        user_notes: row.get("user_notes"),
    })
}

// ============================================================================
// Instrument profiles
// ============================================================================

pub async fn upsert_instrument_profile<'e, E>(executor: E, profile: &InstrumentProfile) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO instrument_profiles (
            id, account_id, name, value_key, category, description,
            mic_recommendations, eq_settings, compression_settings,
            fx_recommendations, mixing_notes, active
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id, value_key) DO UPDATE SET
            name = excluded.name,
            category = excluded.category,
            description = excluded.description,
            mic_recommendations = excluded.mic_recommendations,
            eq_settings = excluded.eq_settings,
            compression_settings = excluded.compression_settings,
            fx_recommendations = excluded.fx_recommendations,
            mixing_notes = excluded.mixing_notes,
            active = excluded.active
        "#,
    )
    .bind(profile.id.to_string())
    .bind(profile.account_id.to_string())
    .bind(&profile.name)
    .bind(profile.key())
    .bind(&profile.category)
    .bind(&profile.description)
    .bind(opt_json_text(profile.mic_recommendations.as_ref())?)
    .bind(opt_json_text(profile.eq_settings.as_ref())?)
    .bind(opt_json_text(profile.compression_settings.as_ref())?)
    .bind(opt_json_text(profile.fx_recommendations.as_ref())?)
    .bind(&profile.mixing_notes)
    .bind(profile.active)
    .execute(executor)
    .await?;

    Ok(())
}

/// All instrument profiles for the account, active or not
pub async fn list_instrument_profiles(
    pool: &SqlitePool,
    account_id: Uuid,
) -> Result<Vec<InstrumentProfile>> {
    let rows = sqlx::query(
        r#"
        SELECT id, account_id, name, value_key, category, description,
               mic_recommendations, eq_settings, compression_settings,
               fx_recommendations, mixing_notes, active
        FROM instrument_profiles
        WHERE account_id = ?
        ORDER BY category, name
        "#,
    )
    .bind(account_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(decode_rows(&rows, "instrument_profiles", instrument_from_row))
}

fn instrument_from_row(row: &SqliteRow) -> Result<InstrumentProfile> {
    Ok(InstrumentProfile {
        id: parse_uuid(row.get("id"), "instrument_profiles.id")?,
        account_id: parse_uuid(row.get("account_id"), "instrument_profiles.account_id")?,
        name: row.get("name"),
        value_key: row.get("value_key"),
        category: row.get("category"),
        description: row.get("description"),
        mic_recommendations: parse_json(row.get("mic_recommendations"))?,
        eq_settings: parse_json(row.get("eq_settings"))?,
        compression_settings: parse_json(row.get("compression_settings"))?,
        fx_recommendations: parse_json(row.get("fx_recommendations"))?,
        mixing_notes: row.get("mixing_notes"),
        active: row.get("active"),
    })
}

// ============================================================================
// Venue-type profiles
// ============================================================================

pub async fn upsert_venue_profile<'e, E>(executor: E, profile: &VenueProfile) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO venue_type_profiles (
            id, account_id, name, value_key, category, description,
            acoustic_characteristics, eq_strategy, fx_approach,
            compression_philosophy, monitoring_notes, special_considerations, active
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id, value_key) DO UPDATE SET
            name = excluded.name,
            category = excluded.category,
            description = excluded.description,
            acoustic_characteristics = excluded.acoustic_characteristics,
            eq_strategy = excluded.eq_strategy,
            fx_approach = excluded.fx_approach,
            compression_philosophy = excluded.compression_philosophy,
            monitoring_notes = excluded.monitoring_notes,
            special_considerations = excluded.special_considerations,
            active = excluded.active
        "#,
    )
    .bind(profile.id.to_string())
    .bind(profile.account_id.to_string())
    .bind(&profile.name)
    .bind(profile.key())
    .bind(&profile.category)
    .bind(&profile.description)
    .bind(opt_json_text(profile.acoustic_characteristics.as_ref())?)
    .bind(opt_json_text(profile.eq_strategy.as_ref())?)
    .bind(opt_json_text(profile.fx_approach.as_ref())?)
    .bind(opt_json_text(profile.compression_philosophy.as_ref())?)
    .bind(&profile.monitoring_notes)
    .bind(&profile.special_considerations)
    .bind(profile.active)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_venue_profiles(pool: &SqlitePool, account_id: Uuid) -> Result<Vec<VenueProfile>> {
    let rows = sqlx::query(
        r#"
        SELECT id, account_id, name, value_key, category, description,
               acoustic_characteristics, eq_strategy, fx_approach,
               compression_philosophy, monitoring_notes, special_considerations, active
        FROM venue_type_profiles
        WHERE account_id = ?
        ORDER BY category, name
        "#,
    )
    .bind(account_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(decode_rows(&rows, "venue_type_profiles", venue_from_row))
}

fn venue_from_row(row: &SqliteRow) -> Result<VenueProfile> {
    Ok(VenueProfile {
        id: parse_uuid(row.get("id"), "venue_type_profiles.id")?,
        account_id: parse_uuid(row.get("account_id"), "venue_type_profiles.account_id")?,
        name: row.get("name"),
        value_key: row.get("value_key"),
        category: row.get("category"),
        description: row.get("description"),
        acoustic_characteristics: parse_json(row.get("acoustic_characteristics"))?,
        eq_strategy: parse_json(row.get("eq_strategy"))?,
        fx_approach: parse_json(row.get("fx_approach"))?,
        compression_philosophy: parse_json(row.get("compression_philosophy"))?,
        monitoring_notes: row.get("monitoring_notes"),
        special_considerations: row.get("special_considerations"),
        active: row.get("active"),
    })
}

/// Decode each row, skipping the ones that fail
fn decode_rows<T>(
    rows: &[SqliteRow],
    table: &str,
    decode: impl Fn(&SqliteRow) -> Result<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(table, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}
